#[derive(Debug, Clone)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    /// Cost of the incumbent plan after an optimizer iteration.
    IterationUpdate { iteration: usize, cost: f64 },

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn reporter_without_callback_is_silent() {
        let reporter = ProgressReporter::new();
        reporter.report(Progress::PhaseFinish);
    }

    #[test]
    fn callback_receives_every_event() {
        let count = AtomicUsize::new(0);
        let reporter = ProgressReporter::with_callback(Box::new(|_| {
            count.fetch_add(1, Ordering::Relaxed);
        }));
        reporter.report(Progress::TaskStart { total_steps: 3 });
        reporter.report(Progress::TaskIncrement);
        reporter.report(Progress::TaskFinish);
        drop(reporter);
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }
}
