pub mod campaigns;
pub mod documents;
pub mod workflow;
