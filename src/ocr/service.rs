use image::DynamicImage;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{LanguageSelection, Recognizer};
use crate::error::RecognitionError;

type Reply = oneshot::Sender<Result<String, RecognitionError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

struct Job {
    id: JobId,
    crop: DynamicImage,
    reply: Reply,
}

#[derive(Default)]
struct CancelSet(Mutex<HashSet<JobId>>);

impl CancelSet {
    fn insert(&self, id: JobId) {
        if let Ok(mut ids) = self.0.lock() {
            ids.insert(id);
        }
    }

    fn take(&self, id: JobId) -> bool {
        self.0.lock().map(|mut ids| ids.remove(&id)).unwrap_or(false)
    }

    fn contains(&self, id: JobId) -> bool {
        self.0.lock().map(|ids| ids.contains(&id)).unwrap_or(false)
    }
}

/// Jobs are recognized one at a time in submission order.
pub struct RecognitionService {
    sender: Option<mpsc::UnboundedSender<Job>>,
    cancelled: Arc<CancelSet>,
    worker: Option<JoinHandle<()>>,
    language: LanguageSelection,
    engine: &'static str,
    next_id: u64,
}

impl RecognitionService {
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut recognizer: Box<dyn Recognizer>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let cancelled = Arc::new(CancelSet::default());
        let language = recognizer.language().clone();
        let engine = recognizer.name();
        let worker_cancelled = Arc::clone(&cancelled);
        let worker = tokio::task::spawn_blocking(move || {
            while let Some(job) = receiver.blocking_recv() {
                if worker_cancelled.take(job.id) || job.reply.is_closed() {
                    debug!("skipping cancelled recognition {:?}", job.id);
                    continue;
                }
                let result = recognizer.recognize(&job.crop);
                if worker_cancelled.take(job.id) {
                    debug!("discarding result of cancelled recognition {:?}", job.id);
                    continue;
                }
                let _ = job.reply.send(result);
            }
        });
        Self {
            sender: Some(sender),
            cancelled,
            worker: Some(worker),
            language,
            engine,
            next_id: 0,
        }
    }

    pub fn language(&self) -> &LanguageSelection {
        &self.language
    }

    pub fn engine(&self) -> &'static str {
        self.engine
    }

    pub fn submit(&mut self, crop: DynamicImage) -> Result<PendingRecognition, RecognitionError> {
        let id = JobId(self.next_id);
        self.next_id += 1;
        let (reply, receiver) = oneshot::channel();
        let sender = self.sender.as_ref().ok_or_else(stopped)?;
        sender
            .send(Job { id, crop, reply })
            .map_err(|_| stopped())?;
        Ok(PendingRecognition {
            id,
            receiver,
            cancelled: Arc::clone(&self.cancelled),
        })
    }

    pub async fn shutdown(mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take()
            && let Err(err) = worker.await
        {
            warn!("recognition worker stopped abnormally: {}", err);
        }
    }
}

fn stopped() -> RecognitionError {
    RecognitionError::NotInitialized("recognition worker has stopped".to_string())
}

pub struct PendingRecognition {
    id: JobId,
    receiver: oneshot::Receiver<Result<String, RecognitionError>>,
    cancelled: Arc<CancelSet>,
}

impl PendingRecognition {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Queued jobs are skipped; an in-flight call finishes but its result is dropped.
    pub fn cancel(&self) {
        self.cancelled.insert(self.id);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.contains(self.id)
    }

    pub async fn wait(mut self) -> Result<String, RecognitionError> {
        let received = (&mut self.receiver).await;
        if self.cancelled.take(self.id) {
            return Err(RecognitionError::Cancelled);
        }
        match received {
            Ok(result) => result,
            Err(_) => Err(RecognitionError::Cancelled),
        }
    }
}

impl Drop for PendingRecognition {
    fn drop(&mut self) {
        self.cancelled.take(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OcrLanguage;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    struct WidthRecognizer {
        language: LanguageSelection,
        gate: Option<std_mpsc::Receiver<()>>,
    }

    impl Recognizer for WidthRecognizer {
        fn name(&self) -> &'static str {
            "width"
        }

        fn language(&self) -> &LanguageSelection {
            &self.language
        }

        fn recognize(&mut self, crop: &DynamicImage) -> Result<String, RecognitionError> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            if crop.width() == 13 {
                return Err(RecognitionError::engine("unlucky crop"));
            }
            Ok(format!("w{}", crop.width()))
        }
    }

    fn service(gate: Option<std_mpsc::Receiver<()>>) -> RecognitionService {
        RecognitionService::spawn(Box::new(WidthRecognizer {
            language: LanguageSelection::single(OcrLanguage::English),
            gate,
        }))
    }

    #[tokio::test]
    async fn results_come_back_per_job_in_order() {
        let mut service = service(None);
        let pending: Vec<_> = [3u32, 13, 5]
            .into_iter()
            .map(|w| service.submit(DynamicImage::new_rgba8(w, 1)).expect("submit"))
            .collect();
        let mut results = Vec::new();
        for job in pending {
            results.push(job.wait().await);
        }
        assert_eq!(results[0].as_deref().expect("first"), "w3");
        assert!(matches!(results[1], Err(RecognitionError::Engine(_))));
        assert_eq!(results[2].as_deref().expect("third"), "w5");
        assert_eq!(service.engine(), "width");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_jobs_report_cancellation() {
        let (open, gate) = std_mpsc::channel();
        let mut service = service(Some(gate));
        let in_flight = service.submit(DynamicImage::new_rgba8(1, 1)).expect("submit");
        let queued = service.submit(DynamicImage::new_rgba8(2, 1)).expect("submit");
        let kept = service.submit(DynamicImage::new_rgba8(4, 1)).expect("submit");
        in_flight.cancel();
        queued.cancel();
        assert!(queued.is_cancelled());
        for _ in 0..3 {
            open.send(()).expect("open gate");
        }
        assert!(matches!(in_flight.wait().await, Err(RecognitionError::Cancelled)));
        assert!(matches!(queued.wait().await, Err(RecognitionError::Cancelled)));
        assert_eq!(kept.wait().await.expect("kept"), "w4");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn cancelling_after_the_reply_leaves_no_stale_ids() {
        let mut service = service(None);
        let answered = service.submit(DynamicImage::new_rgba8(6, 1)).expect("submit");
        let dropped = service.submit(DynamicImage::new_rgba8(7, 1)).expect("submit");
        let later = service.submit(DynamicImage::new_rgba8(8, 1)).expect("submit");
        assert_eq!(later.wait().await.expect("later"), "w8");

        answered.cancel();
        dropped.cancel();
        drop(dropped);
        assert!(matches!(answered.wait().await, Err(RecognitionError::Cancelled)));
        let stale = service.cancelled.0.lock().map(|ids| ids.len()).unwrap_or(usize::MAX);
        assert_eq!(stale, 0);
        service.shutdown().await;
    }
}
