pub mod draft_service;
pub mod proposal_service;

pub use proposal_service::ProposalService;
