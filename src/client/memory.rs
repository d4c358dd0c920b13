use super::*;
use std::sync::RwLock;

/// In-process hash map store. Useful for shaking out harness behavior
/// with no external dependency and as the template for real clients.
pub struct MemoryClient {
    store: RwLock<HashMap<String, String>>,
    data: RwLock<Option<Arc<DataGenerator>>>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            data: RwLock::new(None),
        }
    }

    fn value(&self) -> anyhow::Result<String> {
        let guard = self
            .data
            .read()
            .map_err(|_| anyhow::anyhow!("value pool lock poisoned"))?;
        let generator = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("client used before init"))?;
        Ok(generator.value(&mut rand::thread_rng()))
    }
}

#[async_trait]
impl Client for MemoryClient {
    async fn init(&self, data: Arc<DataGenerator>) -> anyhow::Result<()> {
        *self
            .data
            .write()
            .map_err(|_| anyhow::anyhow!("value pool lock poisoned"))? = Some(data);
        Ok(())
    }

    async fn read_single(&self, key: &str) -> anyhow::Result<Option<String>> {
        let store = self
            .store
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(store.get(key).cloned())
    }

    async fn write_single(&self, key: &str) -> anyhow::Result<String> {
        let value = self.value()?;
        let mut store = self
            .store
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        store.insert(key.to_string(), value);
        Ok("ok".to_string())
    }

    async fn read_bulk(&self, keys: &[String]) -> anyhow::Result<Vec<Option<String>>> {
        let store = self
            .store
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(keys.iter().map(|key| store.get(key).cloned()).collect())
    }

    async fn write_bulk(&self, keys: &[String]) -> anyhow::Result<Vec<String>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self.value()?;
            let mut store = self
                .store
                .write()
                .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
            store.insert(key.clone(), value);
            results.push("ok".to_string());
        }
        Ok(results)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.store
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?
            .clear();
        Ok(())
    }

    fn connection_info(&self) -> String {
        "in-process memory store".to_string()
    }
}
