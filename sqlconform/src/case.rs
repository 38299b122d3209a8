//! Test case model and declarative fixture parsing.

use std::fmt;

use serde::Deserialize;

/// How a value is pulled out of each row of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FieldAccessor {
    /// Look the column up by name. No case-folding is applied; the name must
    /// match the server's column metadata exactly.
    ByName(String),
    /// 1-based column position.
    ByPosition(usize),
}

impl fmt::Display for FieldAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldAccessor::ByName(name) => write!(f, "\"{name}\""),
            FieldAccessor::ByPosition(pos) => write!(f, "#{pos}"),
        }
    }
}

impl From<&str> for FieldAccessor {
    fn from(name: &str) -> Self {
        FieldAccessor::ByName(name.to_string())
    }
}

impl From<usize> for FieldAccessor {
    fn from(pos: usize) -> Self {
        FieldAccessor::ByPosition(pos)
    }
}

/// What a statement is expected to produce.
///
/// A case describes either a non-result-set statement (DDL, DML, some admin
/// calls) or a result-set statement, never both. The enum makes that
/// invariant unrepresentable in memory; fixtures that populate both or
/// neither shape are rejected at parse time with
/// [`CaseError::InvalidCaseKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// No result set; the reported affected-row count must equal this.
    UpdateCount(u64),
    /// A result set. `values` holds the expected stringified field value of
    /// each row, in the exact order the server returns rows. An empty list
    /// is a valid zero-row expectation.
    Rows {
        accessor: FieldAccessor,
        values: Vec<String>,
    },
}

/// Per-case comparison tolerance.
///
/// Tolerance is an explicit property of the case, not something inferred
/// from the statement text, so a statement that merely mentions a commit
/// function is never silently exempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tolerance {
    /// Every value must match exactly.
    #[default]
    Exact,
    /// The statement's output varies between runs (commit hashes, merge
    /// confirmation messages). A value mismatch is logged and the case
    /// still passes; row-count mismatches stay hard.
    NondeterministicOutput,
}

/// One entry of a conformance script: a statement plus the expected shape of
/// its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Literal SQL or administrative text to execute.
    pub statement: String,
    pub expected: Expected,
    pub tolerance: Tolerance,
}

impl TestCase {
    /// A case for a statement that produces no result set.
    pub fn statement(sql: impl Into<String>, expected_update_count: u64) -> Self {
        TestCase {
            statement: sql.into(),
            expected: Expected::UpdateCount(expected_update_count),
            tolerance: Tolerance::default(),
        }
    }

    /// A case for a statement that produces a result set, compared row by
    /// row through `accessor`.
    pub fn query(
        sql: impl Into<String>,
        accessor: impl Into<FieldAccessor>,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        TestCase {
            statement: sql.into(),
            expected: Expected::Rows {
                accessor: accessor.into(),
                values: values.into_iter().map(Into::into).collect(),
            },
            tolerance: Tolerance::default(),
        }
    }

    /// Marks the case's output as nondeterministic between runs.
    #[must_use]
    pub fn tolerant(mut self) -> Self {
        self.tolerance = Tolerance::NondeterministicOutput;
        self
    }
}

/// The error type for loading a case list.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    /// The record populates both the update-count and result-set shapes, or
    /// neither of them.
    #[error(
        "case {index} ({statement:?}) must set exactly one of \
         `expectedUpdateCount` or `fieldAccessor`/`expectedValues`"
    )]
    InvalidCaseKind { index: usize, statement: String },
    #[error("failed to parse case list: {0}")]
    Parse(#[from] serde_json::Error),
}

/// On-disk form of a case. Field names follow the fixture format; exactly
/// one of the two expectation shapes must be populated.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawCase {
    statement: String,
    expected_update_count: Option<u64>,
    field_accessor: Option<FieldAccessor>,
    expected_values: Option<Vec<String>>,
    #[serde(default)]
    tolerance: Tolerance,
}

/// Parses a declarative case list from a JSON array.
///
/// ```json
/// [
///     {"statement": "insert into t values (1)", "expectedUpdateCount": 1},
///     {"statement": "select pk from t", "fieldAccessor": "pk", "expectedValues": ["1"]},
///     {"statement": "select dolt_commit('-m', 'c')", "fieldAccessor": 1,
///      "expectedValues": [""], "tolerance": "nondeterministic_output"}
/// ]
/// ```
pub fn parse_cases(json: &str) -> Result<Vec<TestCase>, CaseError> {
    let raw: Vec<RawCase> = serde_json::from_str(json)?;
    raw.into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let expected = match (raw.expected_update_count, raw.field_accessor) {
                (Some(count), None) if raw.expected_values.is_none() => {
                    Expected::UpdateCount(count)
                }
                (None, Some(accessor)) => Expected::Rows {
                    accessor,
                    values: raw.expected_values.unwrap_or_default(),
                },
                _ => {
                    return Err(CaseError::InvalidCaseKind {
                        index,
                        statement: raw.statement,
                    })
                }
            };
            Ok(TestCase {
                statement: raw.statement,
                expected,
                tolerance: raw.tolerance,
            })
        })
        .collect()
}
