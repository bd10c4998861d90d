//! Slicing job client: HTTP submission plus the server-sent progress stream.
//!
//! One job runs at a time.  [`SlicingJobClient::submit`] spawns a task that:
//!
//! 1. `POST {base}/api/slice/start` with a multipart form: the mesh as
//!    `stl_file` and the parameters as `pitch`, `num_angles`, `rot_x`,
//!    `rot_y`, `rot_z`.  The reply is `{"job_id": ".."}` or `{"error": ".."}`.
//! 2. `GET {base}/api/slice/progress/{job_id}` and feeds the
//!    `text/event-stream` body through [`SseDecoder`] and
//!    [`parse_progress_frame`].
//!
//! Every outcome goes back to the controller as a [`JobEvent`] tagged with
//! the submission attempt.  Submitting again aborts the previous task.

use std::sync::{Mutex, MutexGuard};

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tomo_core::protocol::{parse_progress_frame, SseDecoder};
use tomo_core::{JobError, JobUpdate, SlicingParams};

use crate::application::{ControllerEvent, JobEvent, JobSubmitter, MeshUpload};

/// Reply body of the start endpoint.
#[derive(Debug, Deserialize)]
struct StartReply {
    job_id: Option<String>,
    error: Option<String>,
}

/// Talks to the slicing service.
pub struct SlicingJobClient {
    http: reqwest::Client,
    base_url: String,
    controller: mpsc::Sender<ControllerEvent>,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl SlicingJobClient {
    pub fn new(base_url: impl Into<String>, controller: mpsc::Sender<ControllerEvent>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            controller,
            current: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn current(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobSubmitter for SlicingJobClient {
    fn submit(&self, attempt: u64, mesh: MeshUpload, params: SlicingParams) {
        let task = tokio::spawn(run_job(
            self.http.clone(),
            self.base_url.clone(),
            attempt,
            mesh,
            params,
            self.controller.clone(),
        ));
        if let Some(previous) = self.current().replace(task) {
            debug!("aborting previous slicing job");
            previous.abort();
        }
    }

    fn cancel(&self) {
        if let Some(task) = self.current().take() {
            debug!("slicing job cancelled");
            task.abort();
        }
    }
}

async fn run_job(
    http: reqwest::Client,
    base_url: String,
    attempt: u64,
    mesh: MeshUpload,
    params: SlicingParams,
    controller: mpsc::Sender<ControllerEvent>,
) {
    let emit = |event: JobEvent| {
        let controller = controller.clone();
        async move {
            let _ = controller.send(ControllerEvent::Job { attempt, event }).await;
        }
    };

    let job_id = match submit_mesh(&http, &base_url, mesh, &params).await {
        Ok(id) => id,
        Err(e) => {
            emit(JobEvent::SubmitFailed(e)).await;
            return;
        }
    };
    info!("slicing job {job_id} started");
    emit(JobEvent::Accepted {
        job_id: job_id.clone(),
    })
    .await;

    let (tx, mut rx) = mpsc::channel(16);
    let stream = tokio::spawn(stream_progress(http, base_url, job_id, tx));
    let mut terminal = false;
    while let Some(event) = rx.recv().await {
        terminal = !matches!(event, JobEvent::Update(JobUpdate::Progress { .. }));
        emit(event).await;
        if terminal {
            break;
        }
    }
    stream.abort();
    if !terminal {
        emit(JobEvent::StreamLost).await;
    }
}

/// Uploads the mesh and returns the job id.
///
/// # Errors
///
/// Returns [`JobError::SubmitFailed`] for network errors, error statuses
/// (with the server's `error` text when present) or a reply without a job id.
pub async fn submit_mesh(
    http: &reqwest::Client,
    base_url: &str,
    mesh: MeshUpload,
    params: &SlicingParams,
) -> Result<String, JobError> {
    let part = Part::bytes(mesh.bytes)
        .file_name(mesh.file_name)
        .mime_str("application/octet-stream")
        .map_err(|e| JobError::SubmitFailed(e.to_string()))?;
    let form = Form::new()
        .part("stl_file", part)
        .text("pitch", params.voxel_size.to_string())
        .text("num_angles", params.num_projections.to_string())
        .text("rot_x", params.rot_x.to_string())
        .text("rot_y", params.rot_y.to_string())
        .text("rot_z", params.rot_z.to_string());

    let response = http
        .post(format!("{base_url}/api/slice/start"))
        .multipart(form)
        .send()
        .await
        .map_err(|e| JobError::SubmitFailed(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| JobError::SubmitFailed(e.to_string()))?;
    let reply: Option<StartReply> = serde_json::from_str(&body).ok();

    if !status.is_success() {
        let reason = reply
            .and_then(|r| r.error)
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(JobError::SubmitFailed(reason));
    }
    reply
        .and_then(|r| r.job_id)
        .ok_or_else(|| JobError::SubmitFailed("reply carried no job id".to_string()))
}

/// Streams progress for `job_id`, sending each parsed frame to `tx`.
///
/// Stops after the first terminal frame.  Returns without a terminal frame
/// when the stream ends or fails; the caller treats that as a lost stream.
pub async fn stream_progress(
    http: reqwest::Client,
    base_url: String,
    job_id: String,
    tx: mpsc::Sender<JobEvent>,
) {
    let url = format!("{base_url}/api/slice/progress/{job_id}");
    let response = match http
        .get(&url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
    {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            warn!("progress stream refused: HTTP {}", r.status());
            return;
        }
        Err(e) => {
            warn!("progress stream failed: {e}");
            return;
        }
    };

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!("progress stream read failed: {e}");
                return;
            }
        };
        for payload in decoder.feed(&chunk) {
            let event = match parse_progress_frame(&payload) {
                Ok(Some(update)) => JobEvent::Update(update),
                Ok(None) => continue,
                Err(e) => JobEvent::Malformed(e),
            };
            let terminal = !matches!(event, JobEvent::Update(JobUpdate::Progress { .. }));
            if tx.send(event).await.is_err() || terminal {
                return;
            }
        }
    }
    debug!("progress stream for {job_id} ended");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    use tomo_core::protocol::base64;

    /// Reads one HTTP request (headers plus a Content-Length body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serves `responses` to successive connections, returning each request.
    async fn serve(responses: Vec<String>) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                let _ = tx.send(request).await;
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
        });
        (base, rx)
    }

    fn json_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn sse_response(frames: &[&str]) -> String {
        let mut out = String::from(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
        );
        for f in frames {
            out.push_str(&format!("data: {f}\n\n"));
        }
        out
    }

    fn mesh() -> MeshUpload {
        MeshUpload {
            file_name: "bracket.stl".into(),
            bytes: b"solid bracket\nendsolid".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_submit_sends_multipart_fields_and_returns_job_id() {
        // Arrange
        let (base, mut requests) =
            serve(vec![json_response("200 OK", r#"{"job_id":"abc-123"}"#)]).await;
        let params = SlicingParams {
            voxel_size: 0.5,
            num_projections: 120,
            rot_x: 90,
            ..SlicingParams::default()
        };

        // Act
        let job_id = submit_mesh(&reqwest::Client::new(), &base, mesh(), &params)
            .await
            .unwrap();

        // Assert
        assert_eq!(job_id, "abc-123");
        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("POST /api/slice/start"));
        assert!(request.contains(r#"name="stl_file"; filename="bracket.stl""#));
        assert!(request.contains("name=\"pitch\"\r\n\r\n0.5"));
        assert!(request.contains("name=\"num_angles\"\r\n\r\n120"));
        assert!(request.contains("name=\"rot_x\"\r\n\r\n90"));
    }

    #[tokio::test]
    async fn test_submit_error_reply_maps_to_submit_failed() {
        let (base, _requests) = serve(vec![json_response(
            "400 Bad Request",
            r#"{"error":"No file part"}"#,
        )])
        .await;

        let result =
            submit_mesh(&reqwest::Client::new(), &base, mesh(), &SlicingParams::default()).await;

        assert_eq!(result, Err(JobError::SubmitFailed("No file part".into())));
    }

    #[tokio::test]
    async fn test_submit_to_unreachable_server_fails() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let result = submit_mesh(
            &reqwest::Client::new(),
            &format!("http://127.0.0.1:{port}"),
            mesh(),
            &SlicingParams::default(),
        )
        .await;
        assert!(matches!(result, Err(JobError::SubmitFailed(_))));
    }

    #[tokio::test]
    async fn test_job_streams_progress_then_completion() {
        // Arrange
        let image = base64::encode(b"png-bytes");
        let complete = format!(
            r#"{{"status":"complete","progress":100,"stage":"COMPLETE","images":["{image}"]}}"#
        );
        let (base, _requests) = serve(vec![
            json_response("200 OK", r#"{"job_id":"j7"}"#),
            sse_response(&[
                r#"{"status":"Initializing","progress":0,"stage":"IDLE"}"#,
                r#"{"status":"Generating projection 1/1","progress":50,"stage":"PROJECTING"}"#,
                &complete,
            ]),
        ])
        .await;
        let (tx, mut rx) = mpsc::channel(16);
        let client = SlicingJobClient::new(base, tx);

        // Act
        client.submit(3, mesh(), SlicingParams::default());
        let mut events = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_secs(5), rx.recv()).await {
            let done = matches!(
                &event,
                ControllerEvent::Job {
                    event: JobEvent::Update(JobUpdate::Complete { .. }),
                    ..
                }
            );
            events.push(event);
            if done {
                break;
            }
        }

        // Assert
        assert_eq!(events.len(), 4);
        assert!(events
            .iter()
            .all(|e| matches!(e, ControllerEvent::Job { attempt: 3, .. })));
        assert!(matches!(
            &events[0],
            ControllerEvent::Job { event: JobEvent::Accepted { job_id }, .. } if job_id == "j7"
        ));
        match &events[3] {
            ControllerEvent::Job {
                event: JobEvent::Update(JobUpdate::Complete { images }),
                ..
            } => assert_eq!(images.get(0).unwrap().bytes, b"png-bytes".to_vec()),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_ending_without_terminal_frame_is_lost() {
        // Arrange
        let (base, _requests) = serve(vec![
            json_response("200 OK", r#"{"job_id":"j8"}"#),
            sse_response(&[r#"{"status":"Loading","progress":5,"stage":"LOADING"}"#]),
        ])
        .await;
        let (tx, mut rx) = mpsc::channel(16);
        let client = SlicingJobClient::new(base, tx);

        // Act
        client.submit(1, mesh(), SlicingParams::default());
        let mut last = None;
        while let Ok(Some(ControllerEvent::Job { event, .. })) =
            timeout(Duration::from_secs(5), rx.recv()).await
        {
            let lost = event == JobEvent::StreamLost;
            last = Some(event);
            if lost {
                break;
            }
        }

        // Assert
        assert_eq!(last, Some(JobEvent::StreamLost));
    }
}
