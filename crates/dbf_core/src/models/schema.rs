use std::fmt;

use serde::Serialize;

use crate::models::header::{FieldDescriptor, FieldType};

/// Semantic type of a field as seen by schema consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SchemaType {
    String,
    Integer,
    Real,
    DateTime,
    Boolean,
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchemaType::String => "String",
            SchemaType::Integer => "Integer",
            SchemaType::Real => "Real",
            SchemaType::DateTime => "DateTime",
            SchemaType::Boolean => "Boolean",
        };
        f.write_str(name)
    }
}

/// Map a field descriptor to its schema type
pub fn schema_type(field: &FieldDescriptor) -> SchemaType {
    match field.field_type {
        FieldType::Numeric | FieldType::Float if field.decimal_places > 0 => SchemaType::Real,
        FieldType::Numeric | FieldType::Float | FieldType::Integer => SchemaType::Integer,
        FieldType::Double | FieldType::Currency => SchemaType::Real,
        FieldType::Date | FieldType::DateTime => SchemaType::DateTime,
        FieldType::Logical => SchemaType::Boolean,
        FieldType::Character | FieldType::Memo | FieldType::Unknown(_) => SchemaType::String,
    }
}
