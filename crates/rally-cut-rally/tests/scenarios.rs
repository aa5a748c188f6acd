use rally_cut_rally::{ArcExtractor, ArcThresholds, ClusterParams, RallyEngine, RallyThresholds};
use rally_cut_types::{BallPosition, BallTable, FrameSize};

struct Shot {
    frames: std::ops::RangeInclusive<usize>,
    origin: (f64, f64),
    step: (f64, f64),
}

fn table(total: usize, shots: &[Shot], dropped: &[usize]) -> BallTable {
    let mut table = BallTable::new(total);
    for frame in 0..total {
        let balls = shots
            .iter()
            .filter(|shot| shot.frames.contains(&frame) && !dropped.contains(&frame))
            .map(|shot| {
                let t = (frame - shot.frames.start()) as f64;
                BallPosition::new(shot.origin.0 + shot.step.0 * t, shot.origin.1 + shot.step.1 * t)
            })
            .collect();
        table.set(frame, balls);
    }
    table
}

fn engine() -> RallyEngine {
    RallyEngine::with_thresholds(
        ArcThresholds::default(),
        RallyThresholds::default(),
        ClusterParams::default(),
        FrameSize::new(1280, 720),
    )
    .unwrap()
}

fn single_ball(dropped: &[usize]) -> BallTable {
    table(
        100,
        &[Shot {
            frames: 10..=40,
            origin: (200.0, 400.0),
            step: (9.0, -4.0),
        }],
        dropped,
    )
}

#[test]
fn constant_velocity_ball_forms_one_arc() {
    let table = single_ball(&[]);
    let arcs = ArcExtractor::new(&table, ArcThresholds::default()).extract_arcs();
    assert_eq!(arcs.len(), 1);
    assert_eq!((arcs[0].start_frame(), arcs[0].end_frame()), (10, 40));
    assert!(arcs[0].stats().average_angle < 1e-6);
}

#[test]
fn two_missing_detections_keep_the_arc_whole() {
    let table = single_ball(&[20, 21]);
    let arcs = ArcExtractor::new(&table, ArcThresholds::default()).extract_arcs();
    assert_eq!(arcs.len(), 1);
    assert_eq!((arcs[0].start_frame(), arcs[0].end_frame()), (10, 40));
    assert!(arcs[0].get(20).is_none());
    assert!(arcs[0].frames_strictly_increasing());
}

#[test]
fn short_noise_blips_give_no_rally() {
    let table = table(
        600,
        &[
            Shot {
                frames: 100..=104,
                origin: (400.0, 300.0),
                step: (1.0, 1.0),
            },
            Shot {
                frames: 400..=404,
                origin: (700.0, 200.0),
                step: (-1.0, 1.0),
            },
        ],
        &[],
    );
    let report = engine().run(&table);
    assert!(report.rallies.is_empty());
}

fn two_shot_table() -> BallTable {
    table(
        200,
        &[
            Shot {
                frames: 20..=60,
                origin: (300.0, 500.0),
                step: (12.0, -8.0),
            },
            Shot {
                frames: 64..=110,
                origin: (790.0, 190.0),
                step: (-10.0, 7.0),
            },
        ],
        &[],
    )
}

#[test]
fn two_shots_form_one_rally() {
    let report = engine().run(&two_shot_table());
    assert_eq!(report.arcs.len(), 2);
    assert_eq!(report.rallies.len(), 1);
    let record = &report.rallies[0];
    assert_eq!(record.original_index, 0);
    assert_eq!((record.start, record.stop), (20, 110));
    assert!(record.is_selected);
    assert_eq!(record.rally.arc_count(), 2);
    assert!(record.rally.is_ordered());
    for arc in record.rally.arcs() {
        assert!(arc.frames_strictly_increasing());
    }
}

#[test]
fn rally_assembly_is_idempotent() {
    let table = two_shot_table();
    let engine = engine();
    let first = engine.run(&table);
    let second = engine.run(&table);
    assert_eq!(first.rallies, second.rallies);
    assert_eq!(first.arcs, second.arcs);
}
