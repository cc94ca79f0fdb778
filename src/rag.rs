use reqwest::Client;
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result, anyhow};

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    top_k: u32,
}

#[derive(Serialize)]
struct SelectedTextRequest<'a> {
    selected_text: &'a str,
    question: &'a str,
    top_k: u32,
}

/// Raw response body. The backend has shipped both `answer`/`sources` and
/// `response`/`results`, with source fields either inline or nested under
/// `payload`; the aliases and `normalize` fold all of that into one shape.
#[derive(Deserialize)]
struct RawResponse {
    #[serde(default, alias = "response")]
    answer: Option<String>,
    #[serde(default, alias = "results")]
    sources: Option<Vec<RawSource>>,
}

#[derive(Deserialize)]
struct RawSource {
    title: Option<String>,
    module: Option<String>,
    content: Option<String>,
    payload: Option<RawSourceFields>,
}

#[derive(Deserialize)]
struct RawSourceFields {
    title: Option<String>,
    module: Option<String>,
    content: Option<String>,
}

impl RawSource {
    fn normalize(self) -> Source {
        let payload = self.payload.unwrap_or(RawSourceFields {
            title: None,
            module: None,
            content: None,
        });
        Source {
            title: self
                .title
                .or(payload.title)
                .unwrap_or_else(|| "Source".to_string()),
            module: self.module.or(payload.module),
            content: self.content.or(payload.content),
        }
    }
}

/// A cited document returned by the backend alongside an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub module: Option<String>,
    pub content: Option<String>,
}

/// Canonical answer shape seen by the rest of the app. `answer` may be empty
/// when the backend sent none; callers decide the fallback text.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
}

#[derive(Clone)]
pub struct RagClient {
    client: Client,
    base_url: String,
    top_k: u32,
}

impl RagClient {
    pub fn new(base_url: &str, top_k: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            top_k,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask a plain question about the book.
    pub async fn query(&self, question: &str) -> Result<QueryResponse> {
        let request = QueryRequest {
            query: question,
            top_k: self.top_k,
        };
        self.post("/query", &request).await
    }

    /// Ask a question scoped to text the user highlighted.
    pub async fn query_selected_text(
        &self,
        selected_text: &str,
        question: &str,
    ) -> Result<QueryResponse> {
        let request = SelectedTextRequest {
            selected_text,
            question,
            top_k: self.top_k,
        };
        self.post("/query-selected-text", &request).await
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<QueryResponse> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "sending RAG query");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach RAG backend at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("RAG backend error {}: {}", status, text));
        }

        let raw: RawResponse = response
            .json()
            .await
            .context("Failed to parse RAG backend response")?;

        if raw.answer.is_none() {
            tracing::warn!(%url, "response carried no answer field");
        }

        Ok(QueryResponse {
            answer: raw.answer.unwrap_or_default(),
            sources: raw
                .sources
                .unwrap_or_default()
                .into_iter()
                .map(RawSource::normalize)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_query_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/query")
            .match_body(Matcher::PartialJson(json!({
                "query": "what is a node?",
                "top_k": 5,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "answer": "A node is a process.",
                    "sources": [
                        {"title": "Nodes", "module": "ros2-basics", "content": "A node is..."}
                    ],
                    "query": "what is a node?",
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = RagClient::new(&server.url(), 5);
        let response = client.query("what is a node?").await.unwrap();

        assert_eq!(response.answer, "A node is a process.");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].title, "Nodes");
        assert_eq!(response.sources[0].module.as_deref(), Some("ros2-basics"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_alias_fields() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "response": "Aliased answer.",
                    "results": [
                        {"payload": {"title": "Ch 1", "module": "intro", "content": "text"}},
                        {}
                    ],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = RagClient::new(&server.url(), 5);
        let response = client.query("q").await.unwrap();

        assert_eq!(response.answer, "Aliased answer.");
        assert_eq!(response.sources.len(), 2);
        assert_eq!(response.sources[0].title, "Ch 1");
        assert_eq!(response.sources[0].content.as_deref(), Some("text"));
        // A source with no recognizable fields still gets a display title
        assert_eq!(response.sources[1].title, "Source");
    }

    #[tokio::test]
    async fn test_query_missing_answer_is_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"sources": []}).to_string())
            .create_async()
            .await;

        let client = RagClient::new(&server.url(), 5);
        let response = client.query("q").await.unwrap();
        assert!(response.answer.is_empty());
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn test_query_null_sources_tolerated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"answer": "ok", "sources": null}).to_string())
            .create_async()
            .await;

        let client = RagClient::new(&server.url(), 5);
        let response = client.query("q").await.unwrap();
        assert_eq!(response.answer, "ok");
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn test_query_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = RagClient::new(&server.url(), 5);
        let err = client.query("q").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_selected_text_request_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/query-selected-text")
            .match_body(Matcher::PartialJson(json!({
                "selected_text": "a ROS 2 node is a process",
                "question": "explain this",
                "top_k": 5,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"answer": "It means...", "sources": []}).to_string())
            .create_async()
            .await;

        let client = RagClient::new(&server.url(), 5);
        let response = client
            .query_selected_text("a ROS 2 node is a process", "explain this")
            .await
            .unwrap();

        assert_eq!(response.answer, "It means...");
        mock.assert_async().await;
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = RagClient::new("http://localhost:8001/", 5);
        assert_eq!(client.base_url(), "http://localhost:8001");
    }
}
