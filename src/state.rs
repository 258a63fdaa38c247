use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::drops::{DropWrite, DynDropRepository, SqliteDropRepository};
use crate::moderation::{DrainOutcome, ModerationReconciler, SqliteModerationStore};
use crate::notify::{DynTokenStore, FanoutOutcome, NotificationFanout, PushTransport, SqliteTokenStore};
use crate::username::{DynUsernameRegistry, SqliteUsernameRegistry};
use crate::users::SqliteUserDirectory;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub drops: DynDropRepository,
    pub tokens: DynTokenStore,
    pub usernames: DynUsernameRegistry,
    pub reconciler: Arc<ModerationReconciler>,
    pub fanout: Arc<NotificationFanout>,
}

/// What the document-write handlers did for one drop write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DropWriteReport {
    pub moderation: Option<DrainOutcome>,
    pub fanout: Option<FanoutOutcome>,
}

impl AppState {
    /// Wire every server-side component onto one pool.
    pub fn new(db: DbPool, config: Config, push: Arc<dyn PushTransport>) -> Self {
        let tokens: DynTokenStore = Arc::new(SqliteTokenStore::new(db.clone()));
        let reconciler = ModerationReconciler::new(
            Arc::new(SqliteModerationStore::new(db.clone())),
            config.moderation.path_prefix.clone(),
        );
        let fanout = NotificationFanout::new(
            Arc::new(SqliteUserDirectory::new(db.clone())),
            tokens.clone(),
            push,
            config.notify.batch_size,
        );

        Self {
            drops: Arc::new(SqliteDropRepository::new(db.clone())),
            usernames: Arc::new(SqliteUsernameRegistry::new(db.clone())),
            tokens,
            reconciler: Arc::new(reconciler),
            fanout: Arc::new(fanout),
            db,
            config,
        }
    }

    /// Run the drop document-write handlers: queue drain and collector fanout.
    ///
    /// The two are independent, so a failure in one is logged and does not
    /// stop the other.
    pub async fn handle_drop_write(&self, write: &DropWrite) -> DropWriteReport {
        let moderation = async {
            let after = write.after.as_ref()?;
            match self.reconciler.on_drop_written(after).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!("Moderation drain for {} failed: {}", after.id, e);
                    None
                }
            }
        };
        let fanout = async {
            match self.fanout.on_drop_written(write).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!("Collector fanout failed: {}", e);
                    None
                }
            }
        };

        let (moderation, fanout) = tokio::join!(moderation, fanout);
        DropWriteReport { moderation, fanout }
    }

    /// Fire-and-forget variant for request handlers.
    pub fn dispatch_drop_write(&self, write: DropWrite) {
        let state = self.clone();
        tokio::spawn(async move {
            state.handle_drop_write(&write).await;
        });
    }
}
