use training::scheduler::{
    PlateauConfig, PlateauMode, ReduceLrOnPlateau, SchedulerError, ThresholdMode,
};

fn scheduler(cfg: PlateauConfig) -> ReduceLrOnPlateau {
    ReduceLrOnPlateau::new(cfg, 1e-3).unwrap()
}

#[test]
fn reduces_after_patience_is_exceeded() {
    let mut s = scheduler(PlateauConfig::default());
    assert_eq!(s.step(1.0), 1e-3);
    // Three bad epochs are tolerated with patience 3.
    for _ in 0..3 {
        assert_eq!(s.step(1.0), 1e-3);
    }
    let lr = s.step(1.0);
    assert!((lr - 1e-4).abs() < 1e-12);
    assert_eq!(s.num_bad_epochs(), 0);
}

#[test]
fn improvement_resets_the_counter() {
    let mut s = scheduler(PlateauConfig {
        patience: 1,
        ..Default::default()
    });
    s.step(1.0);
    s.step(1.0);
    assert_eq!(s.num_bad_epochs(), 1);
    s.step(0.5);
    assert_eq!(s.num_bad_epochs(), 0);
    assert_eq!(s.best(), Some(0.5));
    assert_eq!(s.lr(), 1e-3);
}

#[test]
fn relative_threshold_ignores_tiny_gains() {
    let mut s = scheduler(PlateauConfig {
        threshold: 0.1,
        ..Default::default()
    });
    s.step(1.0);
    s.step(0.95);
    assert_eq!(s.num_bad_epochs(), 1);
    assert_eq!(s.best(), Some(1.0));
    s.step(0.89);
    assert_eq!(s.best(), Some(0.89));
}

#[test]
fn absolute_max_mode() {
    let mut s = scheduler(PlateauConfig {
        mode: PlateauMode::Max,
        threshold_mode: ThresholdMode::Abs,
        threshold: 0.05,
        patience: 0,
        ..Default::default()
    });
    s.step(0.5);
    assert!((s.step(0.54) - 1e-4).abs() < 1e-12);
    assert_eq!(s.best(), Some(0.5));
}

#[test]
fn cooldown_suspends_counting() {
    let mut s = scheduler(PlateauConfig {
        patience: 0,
        cooldown: 2,
        ..Default::default()
    });
    s.step(1.0);
    let reduced = s.step(1.0);
    assert!((reduced - 1e-4).abs() < 1e-12);
    assert!(s.in_cooldown());
    // Two cooldown epochs without further reduction.
    assert_eq!(s.step(1.0), reduced);
    assert_eq!(s.step(1.0), reduced);
    assert!(!s.in_cooldown());
    assert!(s.step(1.0) < reduced);
}

#[test]
fn respects_min_lr_and_eps() {
    let mut s = scheduler(PlateauConfig {
        patience: 0,
        min_lr: 5e-4,
        ..Default::default()
    });
    s.step(1.0);
    assert_eq!(s.step(1.0), 5e-4);
    // Already at the floor: no change.
    assert_eq!(s.step(1.0), 5e-4);
}

#[test]
fn nan_counts_as_bad_epoch() {
    let mut s = scheduler(PlateauConfig::default());
    s.step(f64::NAN);
    assert_eq!(s.best(), None);
    assert_eq!(s.num_bad_epochs(), 1);
}

#[test]
fn invalid_configs_are_rejected() {
    let err = ReduceLrOnPlateau::new(
        PlateauConfig {
            factor: 1.0,
            ..Default::default()
        },
        1e-3,
    );
    assert_eq!(err.unwrap_err(), SchedulerError::Factor(1.0));
    assert!(ReduceLrOnPlateau::new(
        PlateauConfig {
            min_lr: -1.0,
            ..Default::default()
        },
        1e-3
    )
    .is_err());
    assert!(ReduceLrOnPlateau::new(PlateauConfig::default(), 0.0).is_err());
}

#[test]
fn state_survives_json() {
    let mut s = scheduler(PlateauConfig::default());
    s.step(0.7);
    s.step(0.8);
    let json = serde_json::to_string(&s).unwrap();
    let restored: ReduceLrOnPlateau = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, s);
}
