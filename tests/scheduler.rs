use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use checkin_bot::error::CheckinError;
use checkin_bot::interfaces::scheduler::ScheduledJob;
use checkin_bot::scheduler::Scheduler;
use checkin_bot::Result;

struct TickJob {
    count: Arc<Mutex<u32>>,
    fail: bool,
}

#[async_trait]
impl ScheduledJob for TickJob {
    fn name(&self) -> &str {
        "tick"
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn run(&self) -> Result<()> {
        let mut guard = self.count.lock().unwrap();
        *guard += 1;
        if self.fail {
            return Err(CheckinError::Runtime("boom".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn scheduler_runs_jobs_until_stopped() {
    let result = tokio::time::timeout(Duration::from_secs(1), async {
        let count = Arc::new(Mutex::new(0u32));
        let mut scheduler = Scheduler::new();
        scheduler.register_job(Arc::new(TickJob {
            count: count.clone(),
            fail: false,
        }));
        assert_eq!(scheduler.job_names(), vec!["tick".to_string()]);

        scheduler.start();
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(35)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        let stopped_at = *count.lock().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let later = *count.lock().unwrap();
        (stopped_at, later)
    })
    .await;

    let (stopped_at, later) = result.expect("scheduler test timed out");
    assert!(stopped_at >= 2);
    assert_eq!(stopped_at, later);
}

#[tokio::test]
async fn failing_job_keeps_ticking() {
    let count = Arc::new(Mutex::new(0u32));
    let mut scheduler = Scheduler::new();
    scheduler.register_job(Arc::new(TickJob {
        count: count.clone(),
        fail: true,
    }));

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(35)).await;
    scheduler.stop().await;

    assert!(*count.lock().unwrap() >= 2);
}
