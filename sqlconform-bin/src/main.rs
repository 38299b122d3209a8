mod cases;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use sqlconform::Runner;
use sqlconform_engines::{Postgres, PostgresConfig};

/// Conformance smoke test for a Dolt-style versioned Postgres server.
///
/// Connects to the server under test on 127.0.0.1, runs the built-in
/// statement script over a single connection, and exits non-zero on the
/// first failing case.
#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Opt {
    /// The database username to connect as.
    user: String,

    /// The database server port.
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let opt = Opt::parse();

    let mut config = PostgresConfig::new();
    config
        .host("127.0.0.1")
        .port(opt.port)
        .dbname("doltgres")
        .user(&opt.user)
        .password("password");

    let db = Postgres::connect(config)
        .await
        .context("failed to connect to the server under test")?;

    let mut runner = Runner::new(db);
    let verdict = runner.run_async(&cases::smoke_cases()).await;

    for tolerated in verdict.soft_passes() {
        println!("{} {}", style("[TOLERATED]").yellow().bold(), tolerated);
    }
    match verdict.failure() {
        Some(err) => {
            println!("{}\n{}", style("[FAILED]").red().bold(), err);
            std::process::exit(1);
        }
        None => {
            println!(
                "{} {} cases passed",
                style("[OK]").green().bold(),
                verdict.passed()
            );
            Ok(())
        }
    }
}
