//! Output data models

pub mod enriched_record;

pub use enriched_record::{
    EnrichedRecord, FieldConflict, FieldProvenance, IdentifierOutcome, SourceAttempt,
    SourceDescription, SourceFailure,
};
