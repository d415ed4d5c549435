use std::fmt;
use std::sync::{Mutex, MutexGuard};

use redix_driver::{Cmd, IntoArg, Value};

use crate::client::Client;
use crate::commands::spec::{self, CommandSpec};
use crate::error::ClientError;

/// Commands buffered for one round-trip.
///
/// [`put`](Self::put) may be called from several tasks at once;
/// [`exec`](Self::exec) sends the buffer in `put` order and empties it.
pub struct Pipeline {
    client: Client,
    queued: Mutex<Vec<Queued>>,
}

struct Queued {
    spec: &'static CommandSpec,
    cmd: Cmd,
    keys: Vec<String>,
}

/// At least one pipelined command failed.
///
/// `results` is parallel to the `put` order; commands after a failure were
/// still executed.
#[derive(Debug)]
pub struct PipelineError {
    pub results: Vec<Result<Value, ClientError>>,
    pub first_error_index: usize,
}

impl PipelineError {
    /// The error of the first failed command.
    pub fn first_error(&self) -> Option<&ClientError> {
        self.results
            .get(self.first_error_index)
            .and_then(|r| r.as_ref().err())
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipelined command {} of {} failed",
            self.first_error_index + 1,
            self.results.len()
        )?;
        if let Some(e) = self.first_error() {
            write!(f, ": {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PipelineError {}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("queued", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Start an empty pipeline on this view.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            client: self.clone(),
            queued: Mutex::new(Vec::new()),
        }
    }
}

impl Pipeline {
    fn lock(&self) -> MutexGuard<'_, Vec<Queued>> {
        self.queued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue `command keys... args...`.
    pub fn put<K, A>(&self, command: &str, keys: &[K], args: impl IntoIterator<Item = A>)
    where
        K: AsRef<str>,
        A: IntoArg,
    {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_owned()).collect();
        let cmd = Cmd::new(command).args(keys.iter()).args(args);
        let spec = spec::lookup(command).unwrap_or(&spec::GENERIC);
        self.lock().push(Queued { spec, cmd, keys });
    }

    /// Number of commands waiting for [`exec`](Self::exec).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Send every queued command as one batch.
    ///
    /// Commands rejected by the development-mode preflight are not sent;
    /// their slot in the result carries the preflight error.
    pub async fn exec(&self) -> Result<Vec<Value>, PipelineError> {
        let queued = std::mem::take(&mut *self.lock());
        if queued.is_empty() {
            return Ok(Vec::new());
        }

        let handler = self.client.handler();
        let scope = self.client.scope();
        let mut results: Vec<Option<Result<Value, ClientError>>> = Vec::with_capacity(queued.len());
        let mut batch = Vec::with_capacity(queued.len());
        for q in queued {
            let Queued { spec, cmd, keys } = q;
            match handler.check(scope, spec, || keys) {
                Ok(()) => {
                    results.push(None);
                    batch.push(cmd);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        let guard = handler.before(scope, &spec::PIPELINE, Vec::new);
        let replies: Vec<Result<Value, ClientError>> = if batch.is_empty() {
            Vec::new()
        } else {
            let sent = batch.len();
            let driver = self.client.driver();
            match self
                .client
                .cancellable(async { Ok::<_, ClientError>(driver.exec_batch(batch).await) })
                .await
            {
                Ok(replies) => replies.into_iter().map(|r| r.map_err(ClientError::from)).collect(),
                Err(e) => (0..sent).map(|_| Err(e.clone())).collect(),
            }
        };

        let mut replies = replies.into_iter();
        let results: Vec<Result<Value, ClientError>> = results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    replies
                        .next()
                        .unwrap_or_else(|| Err(ClientError::Probe("missing pipeline reply".into())))
                })
            })
            .collect();

        let first_error_index = results.iter().position(Result::is_err);
        if let Ok(guard) = guard {
            let outcome = match first_error_index.and_then(|i| results[i].as_ref().err()) {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            };
            handler.after(guard, &outcome);
        }

        match first_error_index {
            None => Ok(results.into_iter().flatten().collect()),
            Some(first_error_index) => Err(PipelineError {
                results,
                first_error_index,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use redix_core::ClientConfig;
    use redix_driver::DriverError;
    use redix_driver_memory::{MemoryConnector, MemoryServer};

    use super::*;

    async fn client(config: ClientConfig) -> Client {
        Client::connect_with(config, MemoryConnector::new(MemoryServer::new()))
            .await
            .unwrap()
    }

    fn config() -> ClientConfig {
        ClientConfig::new(["127.0.0.1:6379"])
    }

    #[tokio::test]
    async fn set_then_get() {
        let c = client(config()).await;
        let p = c.pipeline();
        p.put("SET", &["k"], ["v"]);
        p.put("GET", &["k"], Vec::<&str>::new());
        assert_eq!(p.len(), 2);
        let values = p.exec().await.unwrap();
        assert_eq!(values, vec![Value::ok(), Value::bulk("v")]);
        assert!(p.is_empty());
    }

    #[tokio::test]
    async fn nil_is_a_value() {
        let c = client(config()).await;
        let p = c.pipeline();
        p.put("GET", &["missing"], Vec::<&str>::new());
        assert_eq!(p.exec().await.unwrap(), vec![Value::Nil]);
    }

    #[tokio::test]
    async fn failures_keep_their_position() {
        let c = client(config()).await;
        let p = c.pipeline();
        p.put("SET", &["s"], ["text"]);
        p.put("ZCARD", &["s"], Vec::<&str>::new());
        p.put("GET", &["s"], Vec::<&str>::new());
        let err = p.exec().await.unwrap_err();
        assert_eq!(err.first_error_index, 1);
        assert_eq!(err.results.len(), 3);
        assert!(err.results[0].is_ok());
        assert!(matches!(err.first_error(), Some(ClientError::Driver(DriverError::Server(_)))));
        assert_eq!(err.results[2].as_ref().unwrap(), &Value::bulk("text"));
    }

    #[tokio::test]
    async fn preflight_rejects_single_commands() {
        let c = client(config().with_development(true)).await;
        let p = c.pipeline();
        p.put("KEYS", &[] as &[&str], ["*"]);
        p.put("SET", &["k"], ["v"]);
        let err = p.exec().await.unwrap_err();
        assert_eq!(err.first_error_index, 0);
        assert!(matches!(err.results[0], Err(ClientError::Forbidden { .. })));
        assert!(err.results[1].is_ok());
        assert_eq!(c.get::<String>("k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn concurrent_puts_are_all_sent() {
        let c = client(config()).await;
        let p = std::sync::Arc::new(c.pipeline());
        let mut tasks = Vec::new();
        for i in 0..8 {
            let p = p.clone();
            tasks.push(tokio::spawn(async move {
                p.put("INCRBY", &["counter"], [i64::from(i)]);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(p.exec().await.unwrap().len(), 8);
        assert_eq!(c.get::<i64>("counter").await.unwrap(), 28);
    }

    #[tokio::test]
    async fn empty_exec_is_a_no_op() {
        let c = client(config()).await;
        assert!(c.pipeline().exec().await.unwrap().is_empty());
    }
}
