pub mod conversation;
pub mod evaluation;
pub mod gateway;
pub mod llm_provider;
pub mod mock_llm;
pub mod session_lock;
pub mod synthetic;
pub mod worksheet;
