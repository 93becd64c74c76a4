pub mod api;
pub mod backend;
pub mod config;
pub mod orchestrator;
pub mod retrieval;
pub mod router;

pub use api::{ApiServer, ApiServerConfig};
pub use backend::{BackendError, BackendErrorKind, BackendId, BackendPool, Completion, InvocationParams, ModelBackend, Usage};
pub use config::{AppConfig, ResearchMode};
pub use orchestrator::{Answer, Orchestrator, OrchestratorConfig, QueryError, UsageReport};
pub use retrieval::{Paper, ProviderError, ResearchProvider, ResearchRetriever, RetrievalError, RetrievalRequest};
pub use router::{Agent, Dispatch, ModelStrategy, RouteDecision, Router, RoutingStrategy, StrategyName};
