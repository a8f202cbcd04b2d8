mod label_record;

pub use label_record::{FieldResult, FieldStatus, LabelRecord};
