pub mod description;
pub mod report;
pub mod source;
pub mod status;
pub mod taxonomy;

pub use description::{parse_description, ParseFailure, ParsedDescription, TestCounts};
pub use report::{aggregate, Report, ReportError, ReportRow};
pub use source::{BuildRef, BuildSource, BuildStatus, JobStatus, SourceError};
pub use status::RunStatus;
pub use taxonomy::{
    ComponentResults, MatchOutcome, ResultTable, SubcomponentResult, Taxonomy, TaxonomyComponent,
    TaxonomyError, TaxonomyLoader,
};
