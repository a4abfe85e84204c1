use std::sync::Arc;

use switchboard_assistants::AssistantFactory;
use switchboard_cleanup::CleanupScheduler;
use switchboard_core::BrokerConfig;
use switchboard_isolation::IsolationProvider;
use switchboard_locks::LockManager;
use switchboard_store::Store;
use switchboard_templates::TemplateRegistry;

/// Process-wide collaborators, built once at startup and threaded into
/// `handle` as a single object. Everything here is shared-nothing or
/// internally synchronized.
pub struct BrokerContext {
    pub config: BrokerConfig,
    pub store: Arc<Store>,
    pub templates: TemplateRegistry,
    pub isolation: Arc<dyn IsolationProvider>,
    pub locks: LockManager,
    pub cleanup: Arc<CleanupScheduler>,
    pub assistants: AssistantFactory,
}

impl BrokerContext {
    pub fn new(
        config: BrokerConfig,
        store: Arc<Store>,
        isolation: Arc<dyn IsolationProvider>,
        cleanup: Arc<CleanupScheduler>,
    ) -> Self {
        let templates = TemplateRegistry::new(Arc::clone(&store));
        let locks = LockManager::new(config.max_concurrent_conversations);
        let assistants = AssistantFactory::new(&config.assistants);
        Self {
            config,
            store,
            templates,
            isolation,
            locks,
            cleanup,
            assistants,
        }
    }
}
