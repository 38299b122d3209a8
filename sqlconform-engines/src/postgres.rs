use async_trait::async_trait;
use sqlconform::{AsyncDB, DBOutput};
use tokio::task::JoinHandle;
use tokio_postgres::SimpleQueryMessage;

type Result<T> = std::result::Result<T, tokio_postgres::Error>;

/// Postgres engine based on the client from [`tokio_postgres`], using the
/// simple query protocol so every value arrives already string-rendered by
/// the server under test.
pub struct Postgres {
    /// `None` means the connection is closed.
    conn: Option<(tokio_postgres::Client, JoinHandle<()>)>,
}

/// Connection configuration. This is a re-export of [`tokio_postgres::Config`].
pub type PostgresConfig = tokio_postgres::Config;

impl Postgres {
    /// Connects to the server with the given `config`.
    pub async fn connect(config: PostgresConfig) -> Result<Self> {
        let (client, connection) = config.connect(tokio_postgres::NoTls).await?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("Postgres connection error: {:?}", e);
            }
        });

        Ok(Self {
            conn: Some((client, connection)),
        })
    }

    /// Returns a reference of the inner Postgres client.
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.conn.as_ref().expect("connection is shutdown").0
    }

    /// Shutdown the Postgres connection.
    async fn shutdown(&mut self) {
        if let Some((client, connection)) = self.conn.take() {
            drop(client);
            connection.await.ok();
        }
    }
}

#[async_trait]
impl AsyncDB for Postgres {
    type Error = tokio_postgres::Error;

    async fn run(&mut self, sql: &str) -> Result<DBOutput> {
        // A `RowDescription` arrives for every query, including those
        // returning zero rows, so an empty SELECT still classifies as a
        // result set rather than an update count.
        let mut columns: Option<Vec<String>> = None;
        let mut rows = vec![];
        let mut affected = 0;

        for message in self.client().simple_query(sql).await? {
            match message {
                SimpleQueryMessage::RowDescription(description) => {
                    columns.get_or_insert_with(|| {
                        description.iter().map(|c| c.name().to_string()).collect()
                    });
                }
                SimpleQueryMessage::Row(row) => {
                    if columns.is_none() {
                        columns =
                            Some(row.columns().iter().map(|c| c.name().to_string()).collect());
                    }
                    let mut values = Vec::with_capacity(row.len());
                    for i in 0..row.len() {
                        values.push(row.try_get(i)?.unwrap_or("NULL").to_string());
                    }
                    rows.push(values);
                }
                SimpleQueryMessage::CommandComplete(count) => affected = count,
                _ => {}
            }
        }

        match columns {
            Some(columns) => Ok(DBOutput::Rows { columns, rows }),
            None => Ok(DBOutput::StatementComplete(affected)),
        }
    }

    fn engine_name(&self) -> &str {
        "postgres"
    }

    async fn shutdown(&mut self) {
        Postgres::shutdown(self).await;
    }
}
