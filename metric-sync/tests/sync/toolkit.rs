use indexmap::IndexMap;
use metric_sync::toolkit::{
    get_synced_metric, get_synced_metric_collection, get_synced_state_dict,
    get_synced_state_dict_collection, reset_metrics, sync_and_compute,
    sync_and_compute_collection, to_device,
};
use metric_sync::{Device, Metric, Result, Scalar, StateTree, SyncError, Tensor};

use super::helpers::{run_collective, run_instrumented};

fn malformed(name: &str, reason: &str) -> SyncError {
    SyncError::StructuralMismatch {
        path: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Weighted sum kept as a float buffer plus an integer sample count.
#[derive(Clone, Debug, PartialEq)]
struct Mean {
    total: f64,
    count: i64,
}

impl Metric for Mean {
    type Output = f64;

    fn state(&self) -> StateTree {
        StateTree::mapping([
            ("weighted_sum", StateTree::from(Tensor::scalar(self.total))),
            ("weights", StateTree::from(self.count)),
        ])
    }

    fn load_state(&mut self, state: StateTree) -> Result<()> {
        let total = state["weighted_sum"]
            .as_tensor()
            .ok_or_else(|| malformed("weighted_sum", "expected a buffer"))?;
        self.total = total.to_vec::<f64>()?[0];
        self.count = match state["weights"].as_scalar() {
            Some(Scalar::Int(n)) => n,
            _ => return Err(malformed("weights", "expected an integer")),
        };
        Ok(())
    }

    fn merge_state(&mut self, others: &[Self]) -> Result<()> {
        for o in others {
            self.total += o.total;
            self.count += o.count;
        }
        Ok(())
    }

    fn compute(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total / self.count as f64
    }

    fn reset(&mut self) {
        self.total = 0.0;
        self.count = 0;
    }

    // Accumulators live on the host.
    fn to_device(&mut self, _device: Device) {}
}

/// Caches raw samples; merge concatenates every rank's cache.
#[derive(Clone, Debug, Default)]
struct Cat {
    inputs: Vec<Tensor>,
}

impl Metric for Cat {
    type Output = Vec<f64>;

    fn state(&self) -> StateTree {
        StateTree::mapping([("inputs", StateTree::from(self.inputs.clone()))])
    }

    fn load_state(&mut self, state: StateTree) -> Result<()> {
        self.inputs = state["inputs"]
            .as_list()
            .ok_or_else(|| malformed("inputs", "expected a list"))?
            .to_vec();
        Ok(())
    }

    fn merge_state(&mut self, others: &[Self]) -> Result<()> {
        for o in others {
            self.inputs.extend(o.inputs.iter().cloned());
        }
        Ok(())
    }

    fn compute(&self) -> Vec<f64> {
        self.inputs.iter().flat_map(Tensor::to_f64_vec).collect()
    }

    fn prepare_for_merge(&mut self) {
        if self.inputs.len() > 1 {
            let joined: Vec<f64> = self.compute();
            let n = joined.len();
            if let Ok(t) = Tensor::from_vec(joined, &[n]) {
                self.inputs = vec![t];
            }
        }
    }

    fn reset(&mut self) {
        self.inputs.clear();
    }

    fn to_device(&mut self, device: Device) {
        self.inputs = self
            .inputs
            .drain(..)
            .map(|t| t.to_device(device))
            .collect();
    }
}

/// Running maximum, absent until the first update.
#[derive(Clone, Debug, Default)]
struct Max {
    max: Option<Tensor>,
}

impl Metric for Max {
    type Output = Option<f64>;

    fn state(&self) -> StateTree {
        StateTree::mapping([("max", StateTree::from(self.max.clone()))])
    }

    fn load_state(&mut self, state: StateTree) -> Result<()> {
        self.max = state["max"].as_tensor().cloned();
        Ok(())
    }

    fn merge_state(&mut self, others: &[Self]) -> Result<()> {
        for o in others {
            let Some(theirs) = &o.max else { continue };
            let keep = match &self.max {
                Some(ours) => ours.to_f64_vec()[0] >= theirs.to_f64_vec()[0],
                None => false,
            };
            if !keep {
                self.max = Some(theirs.clone());
            }
        }
        Ok(())
    }

    fn compute(&self) -> Option<f64> {
        self.max.as_ref().map(|t| t.to_f64_vec()[0])
    }

    fn reset(&mut self) {
        self.max = None;
    }

    fn to_device(&mut self, device: Device) {
        self.max = self.max.take().map(|t| t.to_device(device));
    }
}

#[tokio::test]
async fn test_sync_and_compute_mean() {
    run_collective(3, |sync| async move {
        let rank = sync.rank().unwrap() as i64;
        let metric = Mean {
            total: 10.0 * (rank + 1) as f64,
            count: rank + 1,
        };
        // totals 10 + 20 + 30 over counts 1 + 2 + 3
        assert_eq!(sync_and_compute(&sync, &metric).await.unwrap(), 10.0);

        let synced = get_synced_metric(&sync, &metric).await.unwrap();
        assert_eq!(synced, Mean { total: 60.0, count: 6 });

        let state = get_synced_state_dict(&sync, &metric).await.unwrap();
        assert_eq!(state["weights"].as_scalar(), Some(Scalar::Int(6)));
    })
    .await;
}

#[tokio::test]
async fn test_cat_metric_gathers_all_samples_in_rank_order() {
    run_collective(3, |sync| async move {
        let rank = sync.rank().unwrap() as usize;
        let metric = Cat {
            inputs: (0..rank)
                .map(|i| Tensor::from_slice(&[(10 * rank + i) as f64]))
                .collect(),
        };
        let values = sync_and_compute(&sync, &metric).await.unwrap();
        assert_eq!(values, vec![10.0, 20.0, 21.0]);

        let synced = get_synced_metric(&sync, &metric).await.unwrap();
        // Rank 2's two samples were joined into one before the gather.
        assert_eq!(synced.inputs.len(), 2);
    })
    .await;
}

#[tokio::test]
async fn test_max_with_absent_ranks() {
    run_collective(3, |sync| async move {
        let rank = sync.rank().unwrap();
        let metric = Max {
            max: (rank != 0).then(|| Tensor::scalar(rank as f32 * 1.5)),
        };
        assert_eq!(sync_and_compute(&sync, &metric).await.unwrap(), Some(3.0));
    })
    .await;
}

#[tokio::test]
async fn test_max_absent_everywhere_stays_absent() {
    run_collective(2, |sync| async move {
        let metric = Max::default();
        assert_eq!(sync_and_compute(&sync, &metric).await.unwrap(), None);
    })
    .await;
}

#[tokio::test]
async fn test_collection_syncs_in_one_structure_round() {
    run_instrumented(2, |sync, group| async move {
        let rank = sync.rank().unwrap() as i64;
        let mut metrics = IndexMap::new();
        metrics.insert(
            "loss".to_string(),
            Mean {
                total: (rank + 1) as f64,
                count: 1,
            },
        );
        metrics.insert(
            "accuracy".to_string(),
            Mean {
                total: 0.5 * rank as f64,
                count: 2,
            },
        );

        let out = sync_and_compute_collection(&sync, &metrics).await.unwrap();
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["loss", "accuracy"]);
        assert_eq!(out["loss"], 1.5);
        assert_eq!(out["accuracy"], 0.125);

        // structure + (buffer descriptor, buffer data, scalar) per metric
        assert_eq!(group.collective_calls(), 1 + 2 * 3);

        let synced = get_synced_metric_collection(&sync, &metrics).await.unwrap();
        assert_eq!(synced["loss"], Mean { total: 3.0, count: 2 });

        let states = get_synced_state_dict_collection(&sync, &metrics).await.unwrap();
        assert_eq!(states["accuracy"]["weights"].as_scalar(), Some(Scalar::Int(4)));
    })
    .await;
}

#[tokio::test]
async fn test_reset_collection_then_sync() {
    run_collective(2, |sync| async move {
        let rank = sync.rank().unwrap() as i64;
        let mut metrics = IndexMap::new();
        metrics.insert("loss".to_string(), Mean { total: 4.0, count: rank + 1 });
        metrics.insert("val".to_string(), Mean { total: 2.0, count: 2 });

        reset_metrics(metrics.values_mut());
        assert!(metrics.values().all(|m| *m == Mean { total: 0.0, count: 0 }));

        let out = sync_and_compute_collection(&sync, &metrics).await.unwrap();
        assert_eq!(out["loss"], 0.0);
        assert_eq!(out["val"], 0.0);
    })
    .await;
}

#[test]
fn test_to_device_moves_held_buffers() {
    let mut cats = vec![
        Cat {
            inputs: vec![Tensor::scalar(1.0f32), Tensor::scalar(2.0f32)],
        },
        Cat::default(),
    ];
    let mut maxes = vec![Max {
        max: Some(Tensor::scalar(3.0f64)),
    }];

    to_device(&mut cats, Device::Cuda(0));
    to_device(&mut maxes, Device::Cuda(0));

    assert!(cats[0].inputs.iter().all(|t| t.device() == Device::Cuda(0)));
    assert!(cats[1].inputs.is_empty());
    assert_eq!(maxes[0].max.as_ref().unwrap().device(), Device::Cuda(0));
    assert_eq!(maxes[0].compute(), Some(3.0));

    reset_metrics(&mut maxes);
    assert_eq!(maxes[0].compute(), None);
}
