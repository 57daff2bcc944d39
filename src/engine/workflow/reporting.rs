use super::StageWorkflow;
use crate::domain::order::Order;
use crate::domain::outcome::OperationOutcome;
use crate::domain::report::{
    average, EfficiencyReport, OperatorThroughput, OrderFilter, OrderHistory, OrderProgress,
    ReportRange, StageEfficiency, StageStatistics,
};
use crate::domain::stage::ProcessingInstance;
use crate::domain::types::StageStatus;
use crate::engine::repositories::repository_failure;
use crate::repository::{InstanceQuery, RepositoryResult};
use std::collections::BTreeMap;

impl StageWorkflow {
    /// 按条件筛选订单并附带进度
    pub fn filtered_orders(&self, filter: &OrderFilter) -> OperationOutcome<Vec<OrderProgress>> {
        match self.collect_orders(filter) {
            Ok(list) => OperationOutcome::ok(format!("共 {} 个订单", list.len()), list),
            Err(e) => repository_failure("订单筛选", "-", e),
        }
    }

    fn collect_orders(&self, filter: &OrderFilter) -> RepositoryResult<Vec<OrderProgress>> {
        let orders = self.repos.order_repo.list_all()?;
        let mut result = Vec::new();

        for order in orders {
            if filter.priority.map_or(false, |p| p != order.priority) {
                continue;
            }
            if filter.created_from.map_or(false, |from| order.created_at < from) {
                continue;
            }
            if filter.created_to.map_or(false, |to| order.created_at > to) {
                continue;
            }

            let instances = self.repos.instance_repo.find_by_order(&order.order_id)?;
            let current = instances.iter().find(|i| i.is_in_progress()).cloned();

            if let Some(stage_id) = &filter.current_stage_id {
                if current.as_ref().map_or(true, |c| &c.stage_id != stage_id) {
                    continue;
                }
            }
            if let Some(assignee) = &filter.assigned_to {
                if current
                    .as_ref()
                    .and_then(|c| c.assigned_to.as_ref())
                    .map_or(true, |a| a != assignee)
                {
                    continue;
                }
            }
            if let Some(status) = filter.has_status {
                if !instances.iter().any(|i| i.status == status) {
                    continue;
                }
            }

            result.push(Self::progress_of(order, &instances, current));
        }
        Ok(result)
    }

    fn progress_of(
        order: Order,
        instances: &[ProcessingInstance],
        current_instance: Option<ProcessingInstance>,
    ) -> OrderProgress {
        let count = |status: StageStatus| instances.iter().filter(|i| i.status == status).count();
        let total_stages = instances.len();
        let completed_stages = count(StageStatus::Completed);
        let skipped_stages = count(StageStatus::Skipped);
        let progress_pct = if total_stages == 0 {
            0.0
        } else {
            (completed_stages + skipped_stages) as f64 / total_stages as f64 * 100.0
        };
        OrderProgress {
            order,
            total_stages,
            completed_stages,
            skipped_stages,
            cancelled_stages: count(StageStatus::Cancelled),
            progress_pct,
            current_instance,
        }
    }

    /// 阶段状态统计 (按目录顺序, 含停用阶段的历史数据)
    pub fn stage_statistics(&self, range: ReportRange) -> OperationOutcome<Vec<StageStatistics>> {
        let instances = match self.instances_in(range) {
            Ok(list) => list,
            Err(e) => return repository_failure("阶段统计", "-", e),
        };
        let definitions = match self.repos.stage_repo.list_all() {
            Ok(defs) => defs,
            Err(e) => return repository_failure("阶段统计", "-", e),
        };

        let stats: Vec<StageStatistics> = definitions
            .iter()
            .map(|def| {
                let mut stat = StageStatistics {
                    stage_id: def.stage_id.clone(),
                    stage_label: def.label.clone(),
                    ..Default::default()
                };
                let mut durations = Vec::new();
                for inst in instances.iter().filter(|i| i.stage_id == def.stage_id) {
                    stat.count(inst.status);
                    if inst.status == StageStatus::Completed {
                        if let Some(minutes) = inst.actual_duration_minutes {
                            durations.push(minutes as f64);
                        }
                    }
                }
                stat.avg_actual_minutes = average(&durations);
                stat
            })
            .collect();

        OperationOutcome::ok(format!("共 {} 个阶段", stats.len()), stats)
    }

    /// 效率指标
    ///
    /// - 阶段: 平均实际/预计时长, 效率比 (预计/实际), 按时完成率 (实际 ≤ 预计)
    /// - 操作人: 完成数量与平均实际时长
    pub fn efficiency_metrics(&self, range: ReportRange) -> OperationOutcome<EfficiencyReport> {
        let instances = match self.instances_in(range) {
            Ok(list) => list,
            Err(e) => return repository_failure("效率统计", "-", e),
        };
        let definitions = match self.repos.stage_repo.list_all() {
            Ok(defs) => defs,
            Err(e) => return repository_failure("效率统计", "-", e),
        };

        let completed: Vec<&ProcessingInstance> = instances
            .iter()
            .filter(|i| i.status == StageStatus::Completed)
            .collect();

        let mut stages = Vec::new();
        let mut on_time_total = 0usize;
        let mut timed_total = 0usize;
        for def in &definitions {
            let done: Vec<&&ProcessingInstance> =
                completed.iter().filter(|i| i.stage_id == def.stage_id).collect();
            if done.is_empty() {
                continue;
            }
            let actual: Vec<f64> = done
                .iter()
                .filter_map(|i| i.actual_duration_minutes)
                .map(|m| m as f64)
                .collect();
            let estimated: Vec<f64> = done
                .iter()
                .filter_map(|i| i.estimated_duration_minutes)
                .map(|m| m as f64)
                .collect();

            let timed: Vec<bool> = done
                .iter()
                .filter_map(|i| match (i.actual_duration_minutes, i.estimated_duration_minutes) {
                    (Some(a), Some(e)) => Some(a <= e),
                    _ => None,
                })
                .collect();
            let on_time = timed.iter().filter(|ok| **ok).count();
            on_time_total += on_time;
            timed_total += timed.len();

            let avg_actual = average(&actual);
            let avg_estimated = average(&estimated);
            stages.push(StageEfficiency {
                stage_id: def.stage_id.clone(),
                stage_label: def.label.clone(),
                completed: done.len(),
                avg_actual_minutes: avg_actual,
                avg_estimated_minutes: avg_estimated,
                efficiency_ratio: match (avg_estimated, avg_actual) {
                    (Some(e), Some(a)) if a > 0.0 => Some(e / a),
                    _ => None,
                },
                on_time_rate: (!timed.is_empty()).then(|| on_time as f64 / timed.len() as f64),
            });
        }

        let mut by_operator: BTreeMap<&str, Vec<Option<i64>>> = BTreeMap::new();
        for inst in &completed {
            if let Some(assignee) = inst.assigned_to.as_deref() {
                by_operator
                    .entry(assignee)
                    .or_default()
                    .push(inst.actual_duration_minutes);
            }
        }
        let operators = by_operator
            .into_iter()
            .map(|(assignee, durations)| {
                let minutes: Vec<f64> = durations.iter().flatten().map(|m| *m as f64).collect();
                OperatorThroughput {
                    assignee: assignee.to_string(),
                    completed: durations.len(),
                    avg_actual_minutes: average(&minutes),
                }
            })
            .collect();

        let report = EfficiencyReport {
            stages,
            operators,
            overall_on_time_rate: (timed_total > 0).then(|| on_time_total as f64 / timed_total as f64),
        };
        OperationOutcome::ok(format!("已完成阶段 {} 个", completed.len()), report)
    }

    /// 订单流转历史: 阶段实例 + 流转记录 (按时间)
    pub fn order_history(&self, order_id: &str) -> OperationOutcome<OrderHistory> {
        let order = match self.load_order(order_id) {
            Ok(order) => order,
            Err(failure) => return failure,
        };
        let instances = match self.repos.instance_repo.find_by_order(order_id) {
            Ok(list) => list,
            Err(e) => return repository_failure("读取订单历史", order_id, e),
        };
        let transitions = match self.repos.transition_repo.find_by_order(order_id) {
            Ok(list) => list,
            Err(e) => return repository_failure("读取订单历史", order_id, e),
        };

        let history = OrderHistory {
            order_id: order.order_id,
            current_stage: order.current_stage,
            instances,
            transitions,
        };
        OperationOutcome::ok(format!("流转记录 {} 条", history.transitions.len()), history)
    }

    fn instances_in(&self, range: ReportRange) -> RepositoryResult<Vec<ProcessingInstance>> {
        self.repos.instance_repo.find_by_query(&InstanceQuery {
            created_from: range.from,
            created_to: range.to,
            ..Default::default()
        })
    }
}
