//! Boffin plugin: tag cloud and tag queries
//!
//! Boffin answers with a qid only; the tracks themselves are fetched through
//! the regular `get_results` polling of that qid.

use crate::client::PlaydarClient;
use crate::error::{Error, Result};
use crate::models::{QueryId, Response};
use crate::transport::ApiCall;
use serde_json::Value;
use tracing::debug;

impl PlaydarClient {
    /// Ask Boffin for the tag cloud of the collection
    ///
    /// `handler` receives the results of the returned qid.
    pub async fn tag_cloud<F>(&self, handler: F) -> Result<QueryId>
    where
        F: FnMut(&Response, bool) + Send + 'static,
    {
        self.boffin_query(ApiCall::boffin(["tagcloud"]), handler)
            .await
    }

    /// Ask Boffin for the tracks tagged `tag`
    pub async fn tag_rql<F>(&self, tag: &str, handler: F) -> Result<QueryId>
    where
        F: FnMut(&Response, bool) + Send + 'static,
    {
        self.boffin_query(ApiCall::boffin(["rql".to_string(), tag_rql(tag)]), handler)
            .await
    }

    async fn boffin_query<F>(&self, call: ApiCall, handler: F) -> Result<QueryId>
    where
        F: FnMut(&Response, bool) + Send + 'static,
    {
        let name = call.name();
        let payload = self.transport().call(call).await?;
        let qid = boffin_qid(&payload)?;
        debug!(qid = %qid, call = %name, "Boffin query accepted");

        self.register_results_handler(handler, Some(qid.clone()))?;
        self.recheck_results(qid.clone())?;
        Ok(qid)
    }
}

/// RQL expression selecting one tag
fn tag_rql(tag: &str) -> String {
    format!("tag:\"{}\"", tag.replace('"', "\\\""))
}

fn boffin_qid(payload: &Value) -> Result<QueryId> {
    payload
        .get("qid")
        .and_then(Value::as_str)
        .filter(|qid| !qid.is_empty())
        .map(QueryId::from)
        .ok_or_else(|| Error::invalid_response("Boffin answer has no qid"))
}
