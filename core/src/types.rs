//! Shared primitive types used across the metrics engine.

/// A sale proposal number, as typed in the sales and payment sheets.
pub type ProposalId = String;

/// A service-order identifier.
pub type OrderId = String;

/// A client code shared by every order of the same subscriber.
pub type ClientCode = String;

/// The canonical report-run identifier.
pub type RunId = String;

/// The identifier of one spreadsheet import.
pub type BatchId = String;

/// A calendar month in `YYYY-MM` form.
pub type MonthKey = String;

/// Placeholder written into blank technician / city / salesperson cells.
pub const NOT_INFORMED: &str = "NÃO INFORMADO";
