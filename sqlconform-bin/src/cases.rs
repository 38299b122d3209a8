//! Built-in smoke script for a Dolt-style versioned Postgres server.

use sqlconform::TestCase;

fn no_values() -> std::iter::Empty<&'static str> {
    std::iter::empty()
}

/// The default conformance script. Order is significant: the branch, merge
/// and log-count cases build on the side effects of the cases before them.
///
/// Commit and merge confirmations embed server-generated hashes, so those
/// cases are marked tolerant.
pub fn smoke_cases() -> Vec<TestCase> {
    vec![
        TestCase::statement("create table test (pk int, value int, primary key(pk))", 0),
        TestCase::query("select * from test", "pk", no_values()),
        TestCase::statement("insert into test (pk, value) values (0,0)", 1),
        TestCase::query("select * from test", "pk", ["0"]),
        TestCase::query("select dolt_add('-A')", 1usize, ["{0}"]),
        TestCase::query("select dolt_commit('-m', 'my commit')", 1usize, [""]).tolerant(),
        TestCase::query("select COUNT(*) FROM dolt_log", 1usize, ["2"]),
        TestCase::query(
            "select dolt_checkout('-b', 'mybranch')",
            1usize,
            ["{0,\"Switched to branch 'mybranch'\"}"],
        ),
        TestCase::statement("insert into test (pk, value) values (1,1)", 1),
        TestCase::query("select dolt_commit('-a', '-m', 'my commit2')", 1usize, [""]).tolerant(),
        TestCase::query(
            "select dolt_checkout('main')",
            1usize,
            ["{0,\"Switched to branch 'main'\"}"],
        ),
        TestCase::query("select dolt_merge('mybranch')", 1usize, [""]).tolerant(),
        TestCase::query("select COUNT(*) FROM dolt_log", 1usize, ["3"]),
    ]
}
