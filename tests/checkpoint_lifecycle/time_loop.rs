//! Backup and rollback inside a transient time loop

use restartable::{BackupState, RestartableDataMap};

use crate::common::{object, registry, strict_engine};

#[test]
fn failed_steps_roll_back_to_the_last_backup() {
    let mut io = strict_engine();
    let mut registry = registry(1);
    let executioner = object("Executioner", "transient", 0);

    executioner
        .declare_restartable_data(&mut registry, "time", || 0.0f64)
        .unwrap();
    executioner
        .declare_restartable_data(&mut registry, "dt", || 0.5f64)
        .unwrap();
    executioner
        .declare_restartable_data(&mut registry, "step", || 0u32)
        .unwrap();

    let mut failures = 0;
    while *executioner.get_restartable_data::<u32>(&registry, "step").unwrap() < 6 {
        io.create_backup(&registry).unwrap();

        let dt = *executioner.get_restartable_data::<f64>(&registry, "dt").unwrap();
        *executioner.get_restartable_data_mut::<f64>(&mut registry, "time").unwrap() += dt;
        *executioner.get_restartable_data_mut::<u32>(&mut registry, "step").unwrap() += 1;

        // Every third step fails once at the full step size
        let step = *executioner.get_restartable_data::<u32>(&registry, "step").unwrap();
        if step % 3 == 0 && dt >= 0.5 {
            failures += 1;
            io.restore_backup(&mut registry, false).unwrap();
            *executioner.get_restartable_data_mut::<f64>(&mut registry, "dt").unwrap() = dt / 2.0;
        } else {
            *executioner.get_restartable_data_mut::<f64>(&mut registry, "dt").unwrap() = 0.5;
        }
    }

    assert_eq!(failures, 2);
    assert_eq!(io.backup_state(), BackupState::Bound);
    // Steps 3 and 6 each ran at half size
    let time = *executioner.get_restartable_data::<f64>(&registry, "time").unwrap();
    assert!((time - 2.5).abs() < 1e-12, "time = {}", time);
}

#[test]
fn worker_threads_mutate_their_own_maps_between_backups() {
    let mut io = strict_engine();
    let mut registry = registry(4);
    for tid in 0..4 {
        object("Kernel", "source", tid)
            .declare_restartable_data(&mut registry, "integral", || 0.0f64)
            .unwrap();
    }

    let advance = |maps: &mut [RestartableDataMap], by: f64| {
        std::thread::scope(|scope| {
            for (tid, map) in maps.iter_mut().enumerate() {
                scope.spawn(move || {
                    *map.get_mut::<f64>("Kernel/source/integral").unwrap() += by * (tid + 1) as f64;
                });
            }
        });
    };

    advance(registry.thread_maps_mut(), 1.0);
    io.create_backup(&registry).unwrap();
    advance(registry.thread_maps_mut(), 100.0);
    io.restore_backup(&mut registry, false).unwrap();

    for tid in 0..4 {
        let value = *object("Kernel", "source", tid)
            .get_restartable_data::<f64>(&registry, "integral")
            .unwrap();
        assert_eq!(value, (tid + 1) as f64);
    }
}

#[test]
fn clearing_the_backup_prevents_restore() {
    let mut io = strict_engine();
    let registry_state = registry(1);
    io.create_backup(&registry_state).unwrap();
    io.clear_backup();

    let mut target = registry(1);
    assert!(io.restore_backup(&mut target, true).is_err());
    assert_eq!(io.backup_state(), BackupState::Unbound);
}
