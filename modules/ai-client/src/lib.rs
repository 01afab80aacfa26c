pub mod claude;
pub mod error;
pub mod pricing;
pub mod schema;

pub use claude::{Claude, Extraction, Usage};
pub use error::{AiError, Result};
pub use pricing::{cost_usd, ModelPricing};
pub use schema::StructuredOutput;
