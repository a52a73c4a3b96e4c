//! Expression model: conditions, modifications, aggregates and queries.
//!
//! Every tree here is plain data. Evaluation lives in [`crate::eval`];
//! storage backends either use that evaluator or translate the trees into
//! their own query language.

mod aggregate;
mod condition;
mod modification;
mod query;
mod restrictions;
mod schema;
mod value;

pub use aggregate::{Aggregate, Aggregator};
pub use condition::Condition;
pub use modification::Modification;
pub use query::{Query, SortPart};
pub use restrictions::{FieldRestriction, UpdateRestrictions};
pub use schema::{FieldAccessor, Schema, SchemaBuilder};
pub use value::{compare_values, get_path, same_kind, set_path, values_equal, FieldPath, OrdValue};

pub(crate) use value::{combine_numbers, NULL};
