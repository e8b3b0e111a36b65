//! Read-only requests.
//!
//! A [`Query`] is the non-transaction consumer of the execution engine: no
//! freezing, no signatures, just an operation payload dispatched to a
//! health-selected node and retried while the answer is not ready yet.

use std::time::Duration;

use arka_types::{NodeId, Status};

use crate::client::Client;
use crate::error::Result;
use crate::execution::{Execute, Outcome};
use crate::proto::{self, OperationData, QueryAck, QueryRequest};

/// A read-only request against the network.
pub struct Query {
    operation: OperationData,
    node_ids: Option<Vec<NodeId>>,
}

impl Query {
    pub fn new(operation: OperationData) -> Self {
        Self {
            operation,
            node_ids: None,
        }
    }

    /// Pin the query to explicit target nodes instead of letting the
    /// network choose.
    pub fn node_ids(mut self, node_ids: Vec<NodeId>) -> Self {
        self.node_ids = Some(node_ids);
        self
    }

    pub async fn execute(&mut self, client: &Client, timeout: Option<Duration>) -> Result<QueryResult> {
        client.execute(self, timeout).await
    }
}

/// Successful query outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// Node that answered.
    pub node_id: NodeId,
    /// Operation-specific response payload.
    pub payload: Vec<u8>,
}

impl Execute for Query {
    type Response = QueryResult;

    fn service(&self) -> &'static str {
        proto::QUERY_SERVICE
    }

    fn method(&self) -> &'static str {
        proto::METHOD_QUERY
    }

    fn node_ids(&self) -> Option<Vec<NodeId>> {
        self.node_ids.clone()
    }

    fn make_request(&mut self, _node_id: NodeId) -> Result<Vec<u8>> {
        // Queries are node-independent; the same bytes go to any target.
        let request = QueryRequest {
            operation_code: self.operation.wire_code(),
            operation_bytes: self.operation.to_payload_bytes()?,
        };
        Ok(proto::encode(&request)?)
    }

    fn classify(&self, response: &[u8]) -> Result<Outcome> {
        let ack: QueryAck = proto::decode(response)?;
        Ok(match ack.status {
            Status::Ok => Outcome::Finished,
            // Not-yet-available is transient on the read path.
            Status::RecordNotFound => Outcome::Retry(ack.status),
            status if status.is_retryable() => Outcome::Retry(status),
            status => Outcome::Error(status),
        })
    }

    fn map_response(&mut self, response: Vec<u8>, node_id: NodeId) -> Result<QueryResult> {
        let ack: QueryAck = proto::decode(&response)?;
        Ok(QueryResult {
            node_id,
            payload: ack.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let query = Query::new(OperationData::data_store(b"k".to_vec(), Vec::new()));

        let encode = |status: Status| {
            proto::encode(&QueryAck {
                status,
                payload: Vec::new(),
            })
            .unwrap()
        };

        assert_eq!(query.classify(&encode(Status::Ok)).unwrap(), Outcome::Finished);
        assert_eq!(
            query.classify(&encode(Status::RecordNotFound)).unwrap(),
            Outcome::Retry(Status::RecordNotFound)
        );
        assert_eq!(
            query.classify(&encode(Status::Busy)).unwrap(),
            Outcome::Retry(Status::Busy)
        );
        assert_eq!(
            query.classify(&encode(Status::InvalidTransaction)).unwrap(),
            Outcome::Error(Status::InvalidTransaction)
        );
    }
}
