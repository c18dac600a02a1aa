pub mod agentic;
pub mod health;
