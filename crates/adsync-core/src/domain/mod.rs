mod record;
mod schema;
mod window;

pub use record::{FieldValue, TypedRecord, UrlAsset};
pub use schema::{FieldDescriptor, FieldSchema, NodeSchema, SemanticType};
pub use window::{format_ymd, parse_ymd, plan_window, DateWindow};
