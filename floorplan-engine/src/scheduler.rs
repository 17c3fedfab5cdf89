//! 按句柄的可取消延时任务，使用宿主推进的逻辑时钟。

use std::time::Duration;

use indexmap::IndexMap;
use tracing::debug;

pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceAction {
    /// 延时后把展位可见性设为给定值。
    SetVisibility(bool),
    /// 延时后销毁节点。
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub action: GraceAction,
    pub due: Duration,
}

#[derive(Debug, Clone)]
pub struct GraceScheduler {
    delay: Duration,
    tasks: IndexMap<String, ScheduledTask>,
}

impl GraceScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            tasks: IndexMap::new(),
        }
    }

    #[inline]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 为句柄安排任务；已有的未到期任务被取消。
    pub fn schedule(&mut self, handle: &str, action: GraceAction, now: Duration) -> Duration {
        let due = now + self.delay;
        if let Some(previous) = self
            .tasks
            .insert(handle.to_string(), ScheduledTask { action, due })
        {
            debug!(handle, ?previous, "取消未到期的延时任务");
        }
        due
    }

    pub fn cancel(&mut self, handle: &str) -> Option<ScheduledTask> {
        self.tasks.shift_remove(handle)
    }

    #[inline]
    pub fn pending(&self, handle: &str) -> Option<&ScheduledTask> {
        self.tasks.get(handle)
    }

    /// 取出所有到期任务，按到期时间排序（相同时间保持安排顺序）。
    pub fn drain_due(&mut self, now: Duration) -> Vec<(String, GraceAction)> {
        let mut due: Vec<(String, ScheduledTask)> = Vec::new();
        self.tasks.retain(|handle, task| {
            if task.due <= now {
                due.push((handle.clone(), *task));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(_, task)| task.due);
        due.into_iter()
            .map(|(handle, task)| (handle, task.action))
            .collect()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for GraceScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn tasks_fire_after_delay() {
        let mut scheduler = GraceScheduler::default();
        scheduler.schedule("S1", GraceAction::Destroy, ms(0));
        assert!(scheduler.drain_due(ms(299)).is_empty());
        assert_eq!(
            scheduler.drain_due(ms(300)),
            vec![("S1".to_string(), GraceAction::Destroy)]
        );
        assert!(scheduler.is_idle());
    }

    #[test]
    fn rescheduling_replaces_pending_task() {
        let mut scheduler = GraceScheduler::new(ms(100));
        scheduler.schedule("S1", GraceAction::SetVisibility(false), ms(0));
        scheduler.schedule("S1", GraceAction::SetVisibility(true), ms(50));
        assert!(scheduler.drain_due(ms(100)).is_empty());
        assert_eq!(
            scheduler.drain_due(ms(150)),
            vec![("S1".to_string(), GraceAction::SetVisibility(true))]
        );
    }

    #[test]
    fn due_tasks_are_ordered_by_due_time() {
        let mut scheduler = GraceScheduler::new(ms(100));
        scheduler.schedule("late", GraceAction::Destroy, ms(20));
        scheduler.schedule("early", GraceAction::Destroy, ms(10));
        let handles: Vec<_> = scheduler
            .drain_due(ms(500))
            .into_iter()
            .map(|(handle, _)| handle)
            .collect();
        assert_eq!(handles, vec!["early", "late"]);
    }

    #[test]
    fn cancelled_tasks_never_fire() {
        let mut scheduler = GraceScheduler::default();
        scheduler.schedule("S1", GraceAction::Destroy, ms(0));
        assert!(scheduler.cancel("S1").is_some());
        assert!(scheduler.drain_due(ms(1_000)).is_empty());
    }
}
