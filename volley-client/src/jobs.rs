//! Job-related API endpoints

use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::VolleyClient;
use crate::error::{ClientError, Result};
use volley_core::domain::job::JobContext;
use volley_core::dto::job::{FollowEvent, JobListing, JobQuery, ListQuery};

/// Live events of a followed job, ending when the job finishes
pub type FollowStream = BoxStream<'static, Result<FollowEvent>>;

impl VolleyClient {
    /// List all jobs as ids
    pub async fn list_jobs(&self) -> Result<Vec<String>> {
        match self.list(false).await? {
            JobListing::Ids(ids) => Ok(ids),
            JobListing::Detailed(contexts) => {
                Ok(contexts.into_iter().filter_map(|c| c.taskid).collect())
            }
        }
    }

    /// List all jobs with their full context
    pub async fn list_jobs_detailed(&self) -> Result<Vec<JobContext>> {
        match self.list(true).await? {
            JobListing::Detailed(contexts) => Ok(contexts),
            // An empty listing decodes as ids whatever the mode
            JobListing::Ids(ids) if ids.is_empty() => Ok(Vec::new()),
            JobListing::Ids(_) => Err(ClientError::ParseError(
                "expected job contexts, got job ids".to_string(),
            )),
        }
    }

    async fn list(&self, detail: bool) -> Result<JobListing> {
        let response = self
            .client
            .get(self.url("/jobs"))
            .query(&ListQuery { detail })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a job by id
    ///
    /// # Arguments
    /// * `jid` - The job id returned at launch
    /// * `outputs` - Include the per-host result history
    pub async fn get_job(&self, jid: &str, outputs: bool) -> Result<JobContext> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{}", jid)))
            .query(&JobQuery {
                outputs,
                follow: false,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Follow a job until it finishes
    ///
    /// The first event is the job snapshot, every later one carries a single
    /// host's new result record.
    pub async fn follow_job(&self, jid: &str, outputs: bool) -> Result<FollowStream> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{}", jid)))
            .query(&JobQuery {
                outputs,
                follow: true,
            })
            .send()
            .await?;
        let response = self.check(response).await?;

        Ok(ndjson_events(response.bytes_stream()))
    }

    /// Delete a finished job and its result history
    pub async fn delete_job(&self, jid: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/jobs/{}", jid)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}

/// Splits a byte stream into newline-delimited JSON events
fn ndjson_events<S, B, E>(bytes: S) -> FollowStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    let state = (Box::pin(bytes), Vec::new(), false);
    stream::unfold(state, |(mut bytes, mut buffer, mut eof)| async move {
        loop {
            if let Some(line) = next_line(&mut buffer, eof) {
                let event = serde_json::from_slice::<FollowEvent>(&line)
                    .map_err(|e| ClientError::ParseError(format!("Bad follow event: {}", e)));
                return Some((event, (bytes, buffer, eof)));
            }
            if eof {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    buffer.clear();
                    return Some((Err(e.into()), (bytes, buffer, true)));
                }
                None => eof = true,
            }
        }
    })
    .boxed()
}

/// Takes the next non-blank line off the buffer
///
/// A trailing line without a newline is only returned once the input ended.
fn next_line(buffer: &mut Vec<u8>, eof: bool) -> Option<Vec<u8>> {
    loop {
        let line = match buffer.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let mut line: Vec<u8> = buffer.drain(..=pos).collect();
                line.pop();
                line
            }
            None if eof && !buffer.is_empty() => std::mem::take(buffer),
            None => return None,
        };
        if !line.iter().all(u8::is_ascii_whitespace) {
            return Some(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<&'static [u8]>> + Send {
        stream::iter(parts.to_vec().into_iter().map(Ok))
    }

    #[test]
    fn test_next_line() {
        let mut buffer = b"{\"a\":1}\n\n{\"b\"".to_vec();
        assert_eq!(next_line(&mut buffer, false).unwrap(), b"{\"a\":1}");
        assert_eq!(next_line(&mut buffer, false), None);
        assert_eq!(next_line(&mut buffer, true).unwrap(), b"{\"b\"");
        assert_eq!(next_line(&mut buffer, true), None);
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let body = chunks(&[
            b"{\"h1\": {\"status\": \"OK\", ",
            b"\"payload\": null}}\n{\"h2\": {\"status\"",
            b": \"FAILED\", \"payload\": \"boom\"}}\n",
        ]);
        let events: Vec<_> = ndjson_events(body).collect().await;

        assert_eq!(events.len(), 2);
        for (event, host) in events.into_iter().zip(["h1", "h2"]) {
            match event.unwrap() {
                FollowEvent::Update(map) => assert!(map.contains_key(host)),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_bad_line_is_parse_error() {
        let events: Vec<_> = ndjson_events(chunks(&[b"not json\n"])).collect().await;

        assert!(matches!(events[0], Err(ClientError::ParseError(_))));
    }
}
