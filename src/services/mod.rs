//! Service layer: the round scheduler, the participation gateway and the code serving the
//! HTTP and WebSocket routes.

pub mod documentation;
pub mod events;
pub mod health_service;
pub mod participation;
pub mod public_service;
pub mod scheduler;
pub mod storage_supervisor;
pub mod websocket_service;
pub mod winning_number;
