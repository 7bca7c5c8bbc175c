pub mod auth_controller;
pub mod refinement_controller;
pub mod ws_controller;

pub use auth_controller::AuthController;
pub use refinement_controller::RefinementController;
pub use ws_controller::WsRefinementController;
