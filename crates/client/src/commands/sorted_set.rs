use bytes::Bytes;
use redix_driver::{Cmd, IntoArg, ScoredMember, Value};

use super::spec;
use crate::{Client, ClientError};

impl Client {
    /// `ZADD key score member [score member ...]`, returning how many
    /// members were newly added.
    pub async fn zadd<I, M>(&self, key: &str, members: I) -> Result<i64, ClientError>
    where
        I: IntoIterator<Item = (f64, M)>,
        M: IntoArg,
    {
        let mut cmd = Cmd::new("ZADD").arg(key);
        for (score, member) in members {
            cmd.push(score);
            cmd.push(member);
        }
        self.call(&spec::ZADD, cmd, &[key]).await
    }

    /// `ZREM key member [member ...]`, returning how many were removed.
    pub async fn zrem<I, M>(&self, key: &str, members: I) -> Result<i64, ClientError>
    where
        I: IntoIterator<Item = M>,
        M: IntoArg,
    {
        self.call(&spec::ZREM, Cmd::new("ZREM").arg(key).args(members), &[key])
            .await
    }

    pub async fn zcard(&self, key: &str) -> Result<i64, ClientError> {
        self.call(&spec::ZCARD, Cmd::new("ZCARD").arg(key), &[key])
            .await
    }

    /// `ZSCORE key member`; the nil error when the member is absent.
    pub async fn zscore(&self, key: &str, member: impl IntoArg) -> Result<f64, ClientError> {
        self.call(&spec::ZSCORE, Cmd::new("ZSCORE").arg(key).arg(member), &[key])
            .await
    }

    /// `ZRANGEBYSCORE key min max`. Bounds use the server syntax: `-inf`,
    /// `+inf`, and a `(` prefix for exclusive bounds.
    pub async fn zrange_by_score(&self, key: &str, min: &str, max: &str) -> Result<Vec<Bytes>, ClientError> {
        let cmd = Cmd::new("ZRANGEBYSCORE").arg(key).arg(min).arg(max);
        self.call(&spec::ZRANGEBYSCORE, cmd, &[key]).await
    }

    /// `ZRANGEBYSCORE key min max WITHSCORES`.
    pub async fn zrange_by_score_with_scores(
        &self,
        key: &str,
        min: &str,
        max: &str,
    ) -> Result<Vec<ScoredMember>, ClientError> {
        let cmd = Cmd::new("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .arg("WITHSCORES");
        let reply: Value = self.call(&spec::ZRANGEBYSCORE, cmd, &[key]).await?;
        Ok(ScoredMember::decode_list(reply)?)
    }
}
