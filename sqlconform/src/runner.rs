//! Conformance runner: drives an ordered case list against a live database
//! and aggregates a [`Verdict`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::executor::block_on;
use itertools::Itertools;

use crate::case::{Expected, FieldAccessor, TestCase, Tolerance};

/// Raw output of executing one statement against the database under test.
pub enum DBOutput {
    /// The statement produced a result set. `rows` holds the string-rendered
    /// values in row-major order; every row has one value per column.
    Rows {
        /// Column names, in result-set order.
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// The statement completed without a result set, affecting `n` rows.
    StatementComplete(u64),
}

/// The async database to be tested.
#[async_trait]
pub trait AsyncDB: Send {
    /// The error type of statement execution.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Async run a statement and return the output.
    async fn run(&mut self, sql: &str) -> Result<DBOutput, Self::Error>;

    /// Engine name of the current database.
    fn engine_name(&self) -> &str {
        ""
    }

    /// Close the connection. Called exactly once when the runner finishes,
    /// on both the success and the failure path.
    async fn shutdown(&mut self) {}
}

/// Per-case observation, after classification and field extraction but
/// before comparison against the expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The statement reported an affected-row count.
    UpdateCount(u64),
    /// The statement produced a result set; one value per row, extracted
    /// through the case's field accessor, in server row order.
    RowSet(Vec<String>),
}

/// The error for a single failing (or tolerated) case.
#[derive(thiserror::Error, Clone)]
#[error("{kind}\nat case {case}\n")]
pub struct TestError {
    kind: TestErrorKind,
    case: usize,
}

impl std::fmt::Debug for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl TestError {
    /// Returns the corresponding [`TestErrorKind`] for this error.
    pub fn kind(&self) -> TestErrorKind {
        self.kind.clone()
    }

    /// 1-based position of the case in the script.
    pub fn case(&self) -> usize {
        self.case
    }
}

/// The error kind for a failing case.
#[derive(thiserror::Error, Debug, Clone)]
pub enum TestErrorKind {
    #[error("statement failed: {err}\n[SQL] {sql}")]
    Fail {
        sql: String,
        err: Arc<dyn std::error::Error + Send + Sync>,
    },
    #[error("statement is expected to affect {expected} rows, but actually {actual}\n[SQL] {sql}")]
    UpdateCountMismatch {
        sql: String,
        expected: u64,
        actual: u64,
    },
    #[error("query is expected to return {expected} rows, but actually {actual}\n[SQL] {sql}")]
    RowCountMismatch {
        sql: String,
        expected: usize,
        actual: usize,
    },
    #[error(
        "value mismatch at row {row}: expected {expected:?}, actually {actual:?}\n[SQL] {sql}"
    )]
    ValueMismatch {
        sql: String,
        /// Zero-based row index.
        row: usize,
        expected: String,
        actual: String,
    },
    #[error(
        "field {accessor} cannot be resolved against columns [{}]\n[SQL] {sql}",
        .columns.iter().join(", ")
    )]
    UnsupportedAccessor {
        sql: String,
        accessor: FieldAccessor,
        columns: Vec<String>,
    },
    #[error("statement is expected to affect {expected} rows, but produced a result set\n[SQL] {sql}")]
    UnexpectedResultSet { sql: String, expected: u64 },
    #[error("query is expected to produce a result set, but affected {actual} rows\n[SQL] {sql}")]
    MissingResultSet { sql: String, actual: u64 },
}

impl TestErrorKind {
    fn at(self, case: usize) -> TestError {
        TestError { kind: self, case }
    }
}

/// Result of one case that did not fail hard.
#[derive(Debug)]
pub enum CaseStatus {
    Pass,
    /// A value mismatch downgraded under
    /// [`Tolerance::NondeterministicOutput`]. The first mismatch is kept
    /// for reporting.
    SoftPass(TestErrorKind),
}

/// Aggregated result of one full run of a case list.
#[derive(Debug, Default)]
pub struct Verdict {
    passed: usize,
    soft_passes: Vec<TestError>,
    failure: Option<TestError>,
}

impl Verdict {
    /// Whether every case passed. Tolerated mismatches count as passes.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Number of cases that passed, including tolerated mismatches.
    pub fn passed(&self) -> usize {
        self.passed
    }

    /// Tolerated value mismatches, for reporting.
    pub fn soft_passes(&self) -> &[TestError] {
        &self.soft_passes
    }

    /// The first hard failure, if any. Cases after it were never executed.
    pub fn failure(&self) -> Option<&TestError> {
        self.failure.as_ref()
    }
}

/// Conformance runner. Owns the connection for the duration of the run.
pub struct Runner<D: AsyncDB> {
    db: D,
}

impl<D: AsyncDB> Runner<D> {
    /// Create a new runner on the database.
    pub fn new(db: D) -> Self {
        Runner { db }
    }

    /// Run the cases strictly in list order, stopping at the first hard
    /// failure. Later cases causally depend on earlier ones (branch, merge
    /// and log counts build on prior side effects), so nothing is issued
    /// after a failure. The connection is shut down on every exit path.
    pub async fn run_async(&mut self, cases: &[TestCase]) -> Verdict {
        let mut verdict = Verdict::default();
        for (index, case) in cases.iter().enumerate() {
            let ordinal = index + 1;
            tracing::info!(case = ordinal, statement = %case.statement, "running");
            match self.run_case_async(case).await {
                Ok(CaseStatus::Pass) => verdict.passed += 1,
                Ok(CaseStatus::SoftPass(kind)) => {
                    let tolerated = kind.at(ordinal);
                    tracing::warn!(%tolerated, "tolerated nondeterministic output");
                    verdict.passed += 1;
                    verdict.soft_passes.push(tolerated);
                }
                Err(kind) => {
                    verdict.failure = Some(kind.at(ordinal));
                    break;
                }
            }
        }
        self.db.shutdown().await;
        verdict
    }

    /// Sync version of [`Runner::run_async`].
    pub fn run(&mut self, cases: &[TestCase]) -> Verdict {
        block_on(self.run_async(cases))
    }

    /// Run a single case: dispatch, classify, verify.
    pub async fn run_case_async(&mut self, case: &TestCase) -> Result<CaseStatus, TestErrorKind> {
        let outcome = self.observe(case).await?;
        verify(case, &outcome)
    }

    /// Dispatches the statement and classifies the response into an
    /// [`ExecutionOutcome`], extracting the field values for result sets.
    ///
    /// The row-count check happens here, before the accessor is resolved,
    /// so an impossible expectation is reported as a cardinality problem
    /// rather than an accessor problem. A zero-row result set with a
    /// zero-row expectation never touches the accessor at all.
    async fn observe(&mut self, case: &TestCase) -> Result<ExecutionOutcome, TestErrorKind> {
        let output = self
            .db
            .run(&case.statement)
            .await
            .map_err(|e| TestErrorKind::Fail {
                sql: case.statement.clone(),
                err: Arc::new(e),
            })?;

        match output {
            DBOutput::StatementComplete(count) => Ok(ExecutionOutcome::UpdateCount(count)),
            DBOutput::Rows { columns, rows } => {
                let (accessor, values) = match &case.expected {
                    Expected::Rows { accessor, values } => (accessor, values),
                    Expected::UpdateCount(expected) => {
                        return Err(TestErrorKind::UnexpectedResultSet {
                            sql: case.statement.clone(),
                            expected: *expected,
                        })
                    }
                };

                if rows.len() != values.len() {
                    return Err(TestErrorKind::RowCountMismatch {
                        sql: case.statement.clone(),
                        expected: values.len(),
                        actual: rows.len(),
                    });
                }
                if rows.is_empty() {
                    return Ok(ExecutionOutcome::RowSet(vec![]));
                }

                let unsupported = || TestErrorKind::UnsupportedAccessor {
                    sql: case.statement.clone(),
                    accessor: accessor.clone(),
                    columns: columns.clone(),
                };
                let index = resolve_accessor(accessor, &columns).ok_or_else(unsupported)?;

                let mut extracted = Vec::with_capacity(rows.len());
                for row in rows {
                    // Rows narrower than the column metadata are an engine
                    // bug; surface it rather than panic.
                    let value = row.into_iter().nth(index).ok_or_else(unsupported)?;
                    extracted.push(value);
                }
                Ok(ExecutionOutcome::RowSet(extracted))
            }
        }
    }
}

/// Compares an observed outcome against the case's expectation.
///
/// Pure over its inputs, so the comparison rules are testable without any
/// connection.
pub fn verify(case: &TestCase, outcome: &ExecutionOutcome) -> Result<CaseStatus, TestErrorKind> {
    match (&case.expected, outcome) {
        (Expected::UpdateCount(expected), ExecutionOutcome::UpdateCount(actual)) => {
            if actual != expected {
                return Err(TestErrorKind::UpdateCountMismatch {
                    sql: case.statement.clone(),
                    expected: *expected,
                    actual: *actual,
                });
            }
            Ok(CaseStatus::Pass)
        }
        (Expected::UpdateCount(expected), ExecutionOutcome::RowSet(_)) => {
            Err(TestErrorKind::UnexpectedResultSet {
                sql: case.statement.clone(),
                expected: *expected,
            })
        }
        (Expected::Rows { .. }, ExecutionOutcome::UpdateCount(actual)) => {
            Err(TestErrorKind::MissingResultSet {
                sql: case.statement.clone(),
                actual: *actual,
            })
        }
        (Expected::Rows { values, .. }, ExecutionOutcome::RowSet(actual)) => {
            if actual.len() != values.len() {
                return Err(TestErrorKind::RowCountMismatch {
                    sql: case.statement.clone(),
                    expected: values.len(),
                    actual: actual.len(),
                });
            }
            let mut soft = None;
            for (row, (expected, actual)) in values.iter().zip(actual).enumerate() {
                if actual != expected {
                    let mismatch = TestErrorKind::ValueMismatch {
                        sql: case.statement.clone(),
                        row,
                        expected: expected.clone(),
                        actual: actual.clone(),
                    };
                    match case.tolerance {
                        Tolerance::Exact => return Err(mismatch),
                        Tolerance::NondeterministicOutput => {
                            soft.get_or_insert(mismatch);
                        }
                    }
                }
            }
            Ok(match soft {
                Some(kind) => CaseStatus::SoftPass(kind),
                None => CaseStatus::Pass,
            })
        }
    }
}

/// Resolves a field accessor to a zero-based column index. Returns `None`
/// for an unknown column name or a 1-based position of zero or beyond the
/// column count.
fn resolve_accessor(accessor: &FieldAccessor, columns: &[String]) -> Option<usize> {
    match accessor {
        FieldAccessor::ByName(name) => columns.iter().position(|c| c == name),
        FieldAccessor::ByPosition(pos) => (*pos >= 1 && *pos <= columns.len()).then(|| pos - 1),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::case::TestCase;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct MockError(String);

    /// Scripted database: hands out the prepared outputs in order and
    /// records every dispatched statement.
    struct MockDB {
        script: VecDeque<Result<DBOutput, MockError>>,
        executed: Arc<Mutex<Vec<String>>>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl MockDB {
        fn new(script: Vec<Result<DBOutput, MockError>>) -> Self {
            MockDB {
                script: script.into(),
                executed: Arc::new(Mutex::new(vec![])),
                shutdowns: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl AsyncDB for MockDB {
        type Error = MockError;

        async fn run(&mut self, sql: &str) -> Result<DBOutput, MockError> {
            self.executed.lock().unwrap().push(sql.to_string());
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(MockError("statement beyond scripted outputs".into())))
        }

        fn engine_name(&self) -> &str {
            "mock"
        }

        async fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn rows(columns: &[&str], rows: &[&[&str]]) -> DBOutput {
        DBOutput::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        }
    }

    fn no_values() -> std::iter::Empty<&'static str> {
        std::iter::empty()
    }

    #[test]
    fn create_table_passes_on_zero_count() {
        let db = MockDB::new(vec![Ok(DBOutput::StatementComplete(0))]);
        let verdict = Runner::new(db).run(&[TestCase::statement(
            "create table test (pk int, value int, primary key(pk))",
            0,
        )]);
        assert!(verdict.is_success());
        assert_eq!(verdict.passed(), 1);
    }

    #[test]
    fn update_count_mismatch_fails_the_run() {
        let db = MockDB::new(vec![Ok(DBOutput::StatementComplete(0))]);
        let verdict = Runner::new(db).run(&[TestCase::statement(
            "insert into test (pk, value) values (0,0)",
            1,
        )]);
        let failure = verdict.failure().unwrap();
        assert_eq!(failure.case(), 1);
        assert!(matches!(
            failure.kind(),
            TestErrorKind::UpdateCountMismatch {
                expected: 1,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn empty_result_set_with_empty_expectation_passes() {
        let db = MockDB::new(vec![Ok(rows(&["pk", "value"], &[]))]);
        let verdict =
            Runner::new(db).run(&[TestCase::query("select * from test", "pk", no_values())]);
        assert!(verdict.is_success());
    }

    #[test]
    fn zero_row_expectation_never_resolves_the_accessor() {
        // An accessor that could not resolve must not matter when both the
        // expectation and the result set are empty.
        let db = MockDB::new(vec![Ok(rows(&["pk"], &[]))]);
        let verdict = Runner::new(db).run(&[TestCase::query(
            "select * from test",
            "no_such_column",
            no_values(),
        )]);
        assert!(verdict.is_success());
    }

    #[test]
    fn count_by_position() {
        let db = MockDB::new(vec![Ok(rows(&["count"], &[&["2"]]))]);
        let verdict = Runner::new(db).run(&[TestCase::query(
            "select COUNT(*) FROM dolt_log",
            1usize,
            ["2"],
        )]);
        assert!(verdict.is_success());
    }

    #[test]
    fn extracts_named_column_per_row() {
        let db = MockDB::new(vec![Ok(rows(
            &["pk", "value"],
            &[&["0", "10"], &["1", "11"]],
        ))]);
        let verdict =
            Runner::new(db).run(&[TestCase::query("select * from test", "value", ["10", "11"])]);
        assert!(verdict.is_success());
    }

    #[test]
    fn row_count_checked_before_values() {
        // Second row would also mismatch on value; the cardinality problem
        // must be reported instead.
        let db = MockDB::new(vec![Ok(rows(&["pk"], &[&["0"], &["9"]]))]);
        let verdict = Runner::new(db).run(&[TestCase::query("select pk from test", "pk", ["0"])]);
        assert!(matches!(
            verdict.failure().unwrap().kind(),
            TestErrorKind::RowCountMismatch {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn value_mismatch_reports_row_and_values() {
        let db = MockDB::new(vec![Ok(rows(&["pk"], &[&["0"], &["2"]]))]);
        let verdict =
            Runner::new(db).run(&[TestCase::query("select pk from test", "pk", ["0", "1"])]);
        match verdict.failure().unwrap().kind() {
            TestErrorKind::ValueMismatch {
                row,
                expected,
                actual,
                ..
            } => {
                assert_eq!(row, 1);
                assert_eq!(expected, "1");
                assert_eq!(actual, "2");
            }
            other => panic!("expected ValueMismatch, got {other}"),
        }
    }

    #[test]
    fn unknown_column_name_is_unsupported() {
        let db = MockDB::new(vec![Ok(rows(&["pk"], &[&["0"]]))]);
        let verdict =
            Runner::new(db).run(&[TestCase::query("select pk from test", "Pk", ["0"])]);
        assert!(matches!(
            verdict.failure().unwrap().kind(),
            TestErrorKind::UnsupportedAccessor { .. }
        ));
    }

    #[test]
    fn positions_are_one_based() {
        let out_of_range = |pos: usize| {
            let db = MockDB::new(vec![Ok(rows(&["pk", "value"], &[&["0", "10"]]))]);
            let verdict =
                Runner::new(db).run(&[TestCase::query("select * from test", pos, ["0"])]);
            matches!(
                verdict.failure().map(TestError::kind),
                Some(TestErrorKind::UnsupportedAccessor { .. })
            )
        };
        assert!(out_of_range(0));
        assert!(out_of_range(3));
        assert!(!out_of_range(1));
    }

    #[test]
    fn tolerant_case_soft_passes_on_value_mismatch() {
        let db = MockDB::new(vec![
            Ok(rows(&["dolt_commit"], &[&["rkbd1glmik1rl2qbbjq9sebn95ors0as"]])),
            Ok(DBOutput::StatementComplete(1)),
        ]);
        let verdict = Runner::new(db).run(&[
            TestCase::query("select dolt_commit('-m', 'my commit')", 1usize, [""]).tolerant(),
            TestCase::statement("insert into test (pk, value) values (1,1)", 1),
        ]);
        assert!(verdict.is_success());
        assert_eq!(verdict.passed(), 2);
        assert_eq!(verdict.soft_passes().len(), 1);
        assert_eq!(verdict.soft_passes()[0].case(), 1);
        assert!(matches!(
            verdict.soft_passes()[0].kind(),
            TestErrorKind::ValueMismatch { .. }
        ));
    }

    #[test]
    fn tolerance_does_not_cover_row_count() {
        let db = MockDB::new(vec![Ok(rows(&["dolt_merge"], &[&["a"], &["b"]]))]);
        let verdict = Runner::new(db)
            .run(&[TestCase::query("select dolt_merge('mybranch')", 1usize, ["x"]).tolerant()]);
        assert!(matches!(
            verdict.failure().unwrap().kind(),
            TestErrorKind::RowCountMismatch { .. }
        ));
    }

    #[test]
    fn shape_mismatches_are_hard_failures() {
        let db = MockDB::new(vec![Ok(rows(&["pk"], &[&["0"]]))]);
        let verdict = Runner::new(db).run(&[TestCase::statement("select pk from test", 0)]);
        assert!(matches!(
            verdict.failure().unwrap().kind(),
            TestErrorKind::UnexpectedResultSet { expected: 0, .. }
        ));

        let db = MockDB::new(vec![Ok(DBOutput::StatementComplete(3))]);
        let verdict = Runner::new(db).run(&[TestCase::query("delete from test", "pk", ["0"])]);
        assert!(matches!(
            verdict.failure().unwrap().kind(),
            TestErrorKind::MissingResultSet { actual: 3, .. }
        ));
    }

    #[test]
    fn statement_error_fails_the_run() {
        let db = MockDB::new(vec![Err(MockError("table not found".into()))]);
        let verdict = Runner::new(db).run(&[TestCase::statement("drop table missing", 0)]);
        assert!(matches!(
            verdict.failure().unwrap().kind(),
            TestErrorKind::Fail { .. }
        ));
    }

    #[test]
    fn fail_fast_stops_before_the_next_case() {
        let db = MockDB::new(vec![
            Ok(DBOutput::StatementComplete(0)),
            Ok(DBOutput::StatementComplete(0)),
            Ok(DBOutput::StatementComplete(1)),
        ]);
        let executed = db.executed.clone();
        let verdict = Runner::new(db).run(&[
            TestCase::statement("create table test (pk int primary key)", 0),
            TestCase::statement("insert into test values (0)", 1),
            TestCase::statement("insert into test values (1)", 1),
        ]);
        assert_eq!(verdict.failure().unwrap().case(), 2);
        assert_eq!(verdict.passed(), 1);
        assert_eq!(
            *executed.lock().unwrap(),
            vec![
                "create table test (pk int primary key)".to_string(),
                "insert into test values (0)".to_string(),
            ]
        );
    }

    #[test]
    fn connection_shut_down_once_on_both_exit_paths() {
        let db = MockDB::new(vec![Ok(DBOutput::StatementComplete(0))]);
        let shutdowns = db.shutdowns.clone();
        let verdict = Runner::new(db).run(&[TestCase::statement("create table t (pk int)", 0)]);
        assert!(verdict.is_success());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

        let db = MockDB::new(vec![Ok(DBOutput::StatementComplete(5))]);
        let shutdowns = db.shutdowns.clone();
        let verdict = Runner::new(db).run(&[TestCase::statement("create table t (pk int)", 0)]);
        assert!(!verdict.is_success());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn verify_is_usable_without_a_connection() {
        let case = TestCase::query("select message from dolt_log", "message", ["my commit"]);
        let outcome = ExecutionOutcome::RowSet(vec!["my commit".to_string()]);
        assert!(matches!(verify(&case, &outcome), Ok(CaseStatus::Pass)));

        let outcome = ExecutionOutcome::UpdateCount(0);
        assert!(matches!(
            verify(&case, &outcome),
            Err(TestErrorKind::MissingResultSet { .. })
        ));
    }
}
