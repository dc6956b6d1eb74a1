use metric_sync::{
    DataType, Device, Scalar, StateMap, StateTree, Tensor, traversal_order,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::helpers::{METRIC_NAME, cpu_devices, metric_state, run_collective, run_instrumented};

fn assert_scalar_tensor(tree: &StateTree, expected: Tensor) {
    let actual = tree.as_tensor().expect("expected a buffer");
    assert!(
        actual.allclose(&expected, 1e-6, 1e-8),
        "{actual:?} != {expected:?}"
    );
}

#[tokio::test]
async fn test_tensor_sync_states() {
    run_collective(3, |sync| async move {
        let rank = sync.rank().unwrap();
        let (correct, total) = [(11.0f32, 80.0f32), (43.0, 50.0), (51.0, 60.0)][rank as usize];
        let state = metric_state([
            ("num_correct", Tensor::scalar(correct)),
            ("num_total", Tensor::scalar(total)),
        ]);
        let plan = traversal_order(&state);

        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();

        assert_eq!(synced.len(), 3);
        for tree in &synced {
            assert_eq!(tree.as_mapping().unwrap().len(), 1);
            assert_eq!(tree[METRIC_NAME].as_mapping().unwrap().len(), 2);
        }
        assert_scalar_tensor(&synced[0][METRIC_NAME]["num_correct"], Tensor::scalar(11.0f32));
        assert_scalar_tensor(&synced[0][METRIC_NAME]["num_total"], Tensor::scalar(80.0f32));
        assert_scalar_tensor(&synced[1][METRIC_NAME]["num_correct"], Tensor::scalar(43.0f32));
        assert_scalar_tensor(&synced[1][METRIC_NAME]["num_total"], Tensor::scalar(50.0f32));
        assert_scalar_tensor(&synced[2][METRIC_NAME]["num_correct"], Tensor::scalar(51.0f32));
        assert_scalar_tensor(&synced[2][METRIC_NAME]["num_total"], Tensor::scalar(60.0f32));
    })
    .await;
}

#[tokio::test]
async fn test_tensor_list_sync_states() {
    run_collective(3, |sync| async move {
        let rank = sync.rank().unwrap();
        let seen = if rank == 0 {
            vec![Tensor::scalar(1i64), Tensor::scalar(3i64)]
        } else {
            vec![Tensor::scalar(1i64)]
        };
        let state = metric_state([
            ("seen", StateTree::from(seen)),
            ("total", StateTree::from(vec![Tensor::scalar(1i64)])),
        ]);
        let plan = traversal_order(&state);

        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();

        assert_eq!(synced.len(), 3);
        assert_eq!(
            synced[0][METRIC_NAME]["seen"].as_list().unwrap(),
            &[Tensor::scalar(1i64), Tensor::scalar(3i64)]
        );
        for tree in &synced[1..] {
            assert_eq!(
                tree[METRIC_NAME]["seen"].as_list().unwrap(),
                &[Tensor::scalar(1i64)]
            );
        }
        for tree in &synced {
            assert_eq!(
                tree[METRIC_NAME]["total"].as_list().unwrap(),
                &[Tensor::scalar(1i64)]
            );
        }
    })
    .await;
}

#[tokio::test]
async fn test_tensor_dict_sync_states() {
    run_collective(2, |sync| async move {
        let rank = sync.rank().unwrap() as i64;
        let state = metric_state([(
            "mapping",
            StateTree::mapping([
                ("a", Tensor::scalar(rank + 1)),
                ("b", Tensor::scalar(10 * (rank + 1))),
            ]),
        )]);
        let plan = traversal_order(&state);

        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();

        assert_eq!(synced.len(), 2);
        assert_eq!(synced[0][METRIC_NAME]["mapping"]["a"], Tensor::scalar(1i64).into());
        assert_eq!(synced[1][METRIC_NAME]["mapping"]["a"], Tensor::scalar(2i64).into());
        assert_eq!(synced[0][METRIC_NAME]["mapping"]["b"], Tensor::scalar(10i64).into());
        assert_eq!(synced[1][METRIC_NAME]["mapping"]["b"], Tensor::scalar(20i64).into());
    })
    .await;
}

fn ramp(shape: &[usize], offset: f32) -> Tensor {
    let n: usize = shape.iter().product();
    let values: Vec<f32> = (0..n).map(|i| offset + i as f32 * 0.5).collect();
    Tensor::from_vec(values, shape).unwrap()
}

#[tokio::test]
async fn test_complex_mixed_state_sync() {
    run_collective(2, |sync| async move {
        let rank = sync.rank().unwrap();
        let seen: Vec<Tensor> = (0..2 + rank as usize)
            .map(|i| ramp(&[2, 3], (rank * 10 + i as u32) as f32))
            .collect();
        let state = metric_state([
            ("seen", StateTree::from(seen.clone())),
            ("total", StateTree::from(Tensor::scalar(rank as i64 + 1))),
        ]);
        let plan = traversal_order(&state);

        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();

        assert_eq!(synced.len(), 2);
        assert_eq!(synced[0][METRIC_NAME]["seen"].as_list().unwrap().len(), 2);
        assert_eq!(synced[1][METRIC_NAME]["seen"].as_list().unwrap().len(), 3);
        assert_eq!(
            synced[rank as usize][METRIC_NAME]["seen"].as_list().unwrap(),
            seen.as_slice()
        );
        assert_eq!(synced[0][METRIC_NAME]["total"], Tensor::scalar(1i64).into());
        assert_eq!(synced[1][METRIC_NAME]["total"], Tensor::scalar(2i64).into());
        assert_eq!(synced[rank as usize], state);
    })
    .await;
}

#[tokio::test]
async fn test_empty_tensor_list_sync_state() {
    run_collective(2, |sync| async move {
        let rank = sync.rank().unwrap();
        let seen = if rank == 0 {
            vec![ramp(&[2, 3], 0.0), ramp(&[2, 3], 1.0)]
        } else {
            vec![]
        };
        let state = metric_state([
            ("seen", StateTree::from(seen)),
            ("total", StateTree::from(vec![Tensor::scalar(1i64)])),
        ]);
        let plan = traversal_order(&state);

        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();

        assert_eq!(synced.len(), 2);
        assert_eq!(synced[0][METRIC_NAME]["seen"].as_list().unwrap().len(), 2);
        assert_eq!(synced[1][METRIC_NAME]["seen"].as_list().unwrap().len(), 0);
        assert_eq!(synced[0][METRIC_NAME]["seen"].as_list().unwrap()[1], ramp(&[2, 3], 1.0));
    })
    .await;
}

#[tokio::test]
async fn test_all_empty_lists_sync() {
    run_collective(3, |sync| async move {
        let state = metric_state([("seen", StateTree::from(Vec::<Tensor>::new()))]);
        let plan = traversal_order(&state);
        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();
        for tree in &synced {
            assert_eq!(tree, &state);
        }
    })
    .await;
}

#[tokio::test]
async fn test_numeric_sync_state_keeps_kind() {
    run_collective(3, |sync| async move {
        let rank = sync.rank().unwrap();
        let state = match rank {
            0 => metric_state([("num_correct", 11i64), ("num_total", 80i64)]),
            1 => metric_state([("num_correct", 43i64), ("num_total", 50i64)]),
            _ => metric_state([("num_correct", 51.0f64), ("num_total", 60.0f64)]),
        };
        let plan = traversal_order(&state);

        // Scalars need no device.
        let synced = sync
            .sync_states(&state, &Default::default(), &plan)
            .await
            .unwrap();

        assert_eq!(synced.len(), 3);
        let correct: Vec<_> = synced
            .iter()
            .map(|t| t[METRIC_NAME]["num_correct"].as_scalar().unwrap())
            .collect();
        assert_eq!(
            correct,
            vec![Scalar::Int(11), Scalar::Int(43), Scalar::Float(51.0)]
        );
        let total: Vec<_> = synced
            .iter()
            .map(|t| t[METRIC_NAME]["num_total"].as_scalar().unwrap())
            .collect();
        assert_eq!(
            total,
            vec![Scalar::Int(80), Scalar::Int(50), Scalar::Float(60.0)]
        );
    })
    .await;
}

#[tokio::test]
async fn test_absent_buffer_filled_from_authority() {
    run_collective(3, |sync| async move {
        let rank = sync.rank().unwrap();
        let value = if rank == 1 {
            StateTree::from(Tensor::from_vec(vec![1.5f64, 2.5], &[2]).unwrap())
        } else {
            StateTree::Absent
        };
        let state = metric_state([("max", value)]);
        let plan = traversal_order(&state);

        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();

        let zeros = Tensor::zeros(DataType::F64, &[2], Device::Cpu);
        assert_eq!(synced[0][METRIC_NAME]["max"], zeros.clone().into());
        assert_eq!(
            synced[1][METRIC_NAME]["max"].as_tensor().unwrap().to_vec::<f64>().unwrap(),
            vec![1.5, 2.5]
        );
        assert_eq!(synced[2][METRIC_NAME]["max"], zeros.into());
    })
    .await;
}

#[tokio::test]
async fn test_absent_for_all_propagates() {
    run_collective(2, |sync| async move {
        let state = metric_state([("max", StateTree::Absent), ("n", StateTree::from(1i64))]);
        let plan = traversal_order(&state);
        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();
        for tree in &synced {
            assert!(tree[METRIC_NAME]["max"].is_absent());
            assert!(tree[METRIC_NAME].get("max").is_some(), "slot must survive");
        }
    })
    .await;
}

#[tokio::test]
async fn test_differing_buffer_shapes_round_trip() {
    run_collective(3, |sync| async move {
        let rank = sync.rank().unwrap() as usize;
        let local = ramp(&[rank + 1, 2], rank as f32);
        let state = metric_state([("cache", local.clone())]);
        let plan = traversal_order(&state);

        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();

        for (r, tree) in synced.iter().enumerate() {
            assert_eq!(tree[METRIC_NAME]["cache"], ramp(&[r + 1, 2], r as f32).into());
        }
        assert_eq!(synced[rank][METRIC_NAME]["cache"], local.into());
    })
    .await;
}

#[tokio::test]
async fn test_list_elements_with_differing_shapes() {
    run_collective(2, |sync| async move {
        let rank = sync.rank().unwrap() as usize;
        let items: Vec<Tensor> = (0..3 - rank).map(|i| ramp(&[i + rank + 1], i as f32)).collect();
        let state = metric_state([("inputs", StateTree::from(items.clone()))]);
        let plan = traversal_order(&state);

        let synced = sync
            .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
            .await
            .unwrap();

        assert_eq!(synced[rank][METRIC_NAME]["inputs"].as_list().unwrap(), items.as_slice());
        let other = 1 - rank;
        assert_eq!(
            synced[other][METRIC_NAME]["inputs"].as_list().unwrap().len(),
            3 - other
        );
    })
    .await;
}

#[tokio::test]
async fn test_nested_mapping_fidelity() {
    run_collective(2, |sync| async move {
        let rank = sync.rank().unwrap() as i64;
        let state = StateTree::mapping([(
            "outer",
            StateTree::mapping([
                ("inner", StateTree::mapping([("x", rank * 7), ("y", rank - 3)])),
                ("z", StateTree::from(rank as f64 / 2.0)),
                ("empty", StateTree::from(StateMap::new())),
            ]),
        )]);
        let plan = traversal_order(&state);

        let synced = sync
            .sync_states(&state, &Default::default(), &plan)
            .await
            .unwrap();

        for (r, tree) in synced.iter().enumerate() {
            let r = r as i64;
            let expected = StateTree::mapping([(
                "outer",
                StateTree::mapping([
                    ("inner", StateTree::mapping([("x", r * 7), ("y", r - 3)])),
                    ("z", StateTree::from(r as f64 / 2.0)),
                    ("empty", StateTree::from(StateMap::new())),
                ]),
            )]);
            assert_eq!(tree, &expected);
        }
    })
    .await;
}

#[tokio::test]
async fn test_every_rank_gets_identical_bundle() {
    let bundles = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&bundles);
    run_collective(4, move |sync| {
        let sink = Arc::clone(&sink);
        async move {
            let rank = sync.rank().unwrap() as usize;
            let state = metric_state([
                ("seen", StateTree::from(vec![Tensor::scalar(rank as f32); rank])),
                ("n", StateTree::from(rank as i64)),
            ]);
            let plan = traversal_order(&state);
            let synced = sync
                .sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
                .await
                .unwrap();
            sink.lock().unwrap().push(synced);
        }
    })
    .await;

    let bundles = bundles.lock().unwrap();
    assert_eq!(bundles.len(), 4);
    assert!(bundles.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_single_rank_is_identity_without_collectives() {
    run_instrumented(1, |sync, group| async move {
        let state = metric_state([
            ("seen", StateTree::from(vec![Tensor::scalar(2u8)])),
            ("n", StateTree::from(3i64)),
        ]);
        let plan = traversal_order(&state);
        let synced = sync.sync_states(&state, &Default::default(), &plan).await.unwrap();
        assert_eq!(synced, vec![state]);
        assert_eq!(group.collective_calls(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_collective_count_follows_plan() {
    // structure agreement (1) + scalar (1) + buffer (descriptor + data = 2)
    // + list (length 1, then 2 per element) with at most 2 elements = 5
    // + absent-for-all buffer (descriptor only = 1)
    let calls = Arc::new(AtomicUsize::new(0));
    let seen_calls = Arc::clone(&calls);
    run_instrumented(2, move |sync, group| {
        let seen_calls = Arc::clone(&seen_calls);
        async move {
            let rank = sync.rank().unwrap() as usize;
            let state = metric_state([
                ("n", StateTree::from(1i64)),
                ("x", StateTree::from(Tensor::scalar(1.0f32))),
                ("seen", StateTree::from(vec![Tensor::scalar(1u8); rank + 1])),
                ("none", StateTree::Absent),
            ]);
            let plan = traversal_order(&state);
            sync.sync_states(&state, &cpu_devices(&[METRIC_NAME]), &plan)
                .await
                .unwrap();
            assert_eq!(group.collective_calls(), 10);
            seen_calls.fetch_add(1, Ordering::Relaxed);
        }
    })
    .await;
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}
