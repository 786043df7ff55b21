use crate::error::StoreError;
use crate::file::FileRunStore;
use crate::lease::{InProcessLeaseManager, LeaseManager, SqlLeaseManager};
use crate::object::{LocalObjectStorage, ObjectRunStore};
use crate::sql::SqlRunStore;
use crate::store::RunStore;
use configuration::{StoreBackend, StoreSettings};
use std::sync::Arc;

/// The run store selected by the settings, with the lease manager that
/// matches its sharing scope.
#[derive(Clone)]
pub struct StoreHandles {
    pub runs: Arc<dyn RunStore>,
    pub leases: Arc<dyn LeaseManager>,
}

/// Opens the configured backend. The SQL backend shares its pool with a
/// table-backed lease manager; the others only coordinate within this process.
pub async fn open_store(settings: &StoreSettings) -> Result<StoreHandles, StoreError> {
    let handles = match settings.backend {
        StoreBackend::File => StoreHandles {
            runs: Arc::new(FileRunStore::open(&settings.file_path).await?),
            leases: Arc::new(InProcessLeaseManager::new()),
        },
        StoreBackend::Object => {
            let storage = LocalObjectStorage::open(&settings.object_root).await?;
            StoreHandles {
                runs: Arc::new(ObjectRunStore::new(Arc::new(storage))),
                leases: Arc::new(InProcessLeaseManager::new()),
            }
        }
        StoreBackend::Sql => {
            let store = SqlRunStore::open(&settings.database_url).await?;
            let leases = SqlLeaseManager::new(store.pool().clone());
            StoreHandles {
                runs: Arc::new(store),
                leases: Arc::new(leases),
            }
        }
    };
    tracing::info!(backend = handles.runs.backend(), "Run store opened");
    Ok(handles)
}
