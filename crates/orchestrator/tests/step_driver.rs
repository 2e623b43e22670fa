//! End-to-end stepping: inflow, ballistic transport, outlet culling and
//! mixing on a small channel mesh.

use glam::DVec3;
use kernel::{FlowField, Particle, PolyMesh};
use orchestrator::{setup_domain, EngineConfig, StepDriver};

const DT: f64 = 0.05;

fn channel_driver() -> (StepDriver, FlowField) {
    // 2 m long channel with unit cross-section; inflow at x_min with mean
    // velocity 2 m/s, so a particle transits in ~1 s (20 steps).
    let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0), 8, 2, 2);
    let config: EngineConfig = serde_json::from_str(
        r#"{
            "name": "channel",
            "particle_mass": 0.01,
            "time_step": 0.05,
            "seed": 9,
            "boundaries": [ { "patch": "x_min" } ]
        }"#,
    )
    .unwrap();
    config.validate().unwrap();
    let domain = setup_domain(&config, &mesh).unwrap();
    let flow = FlowField::uniform(&mesh, DVec3::new(2.0, 0.0, 0.0), 1.0, 5.0, 0.5, 0.1);
    (StepDriver::new(&mesh, domain, DT), flow)
}

fn ballistic(cloud: &mut kernel::ParticleCloud) {
    for p in cloud.particles_mut() {
        p.position += p.u_particle * DT;
    }
}

#[test]
fn channel_reaches_a_statistical_steady_state() {
    let (mut driver, flow) = channel_driver();

    // Expected injection: rho * u_n * A * dt / m = 1*2*1*0.05/0.01 = 10/step.
    // Steady state after ~20 transit steps is therefore ~200 particles.
    let mut last_removed = 0;
    for _ in 0..60 {
        let stats = driver.advance(&flow, ballistic).unwrap();
        assert!((stats.expected - 10.0).abs() < 1.0e-9);
        last_removed = stats.removed;
    }

    let count = driver.cloud().len();
    assert!(
        (140..=260).contains(&count),
        "steady-state particle count {count} outside the expected band"
    );
    assert!(
        last_removed > 0,
        "particles must be leaving through the outlet by now"
    );

    // Everything still inside the channel (to location tolerance) with a
    // valid cell.
    for p in driver.cloud().particles() {
        assert!((-1.0e-6..=2.0 + 1.0e-6).contains(&p.position.x));
        assert!(p.cell < 8 * 2 * 2);
        assert_eq!(p.shift, DVec3::ZERO, "shifts are consumed every step");
    }
}

#[test]
fn fixed_seed_reproduces_whole_runs() {
    let run = || {
        let (mut driver, flow) = channel_driver();
        for _ in 0..20 {
            driver.advance(&flow, ballistic).unwrap();
        }
        driver.cloud().clone()
    };
    let a = run();
    let b = run();
    assert_eq!(a.particles(), b.particles());
}

#[test]
fn mixing_pass_contracts_scalar_spread() {
    // No boundaries: seed the cloud by hand and watch IEM pull the carried
    // scalar toward the cell mean.
    let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 1, 1, 1);
    let config: EngineConfig = serde_json::from_str(
        r#"{ "name": "mix", "particle_mass": 0.01, "time_step": 0.05,
             "mixing": { "model": "IEM", "cmix": 2.0 } }"#,
    )
    .unwrap();
    let domain = setup_domain(&config, &mesh).unwrap();
    let flow = FlowField::uniform(&mesh, DVec3::ZERO, 1.0, 4.0, 0.5, 0.0);
    let mut driver = StepDriver::new(&mesh, domain, DT);

    for z in [0.0, 0.2, 0.8, 1.0] {
        driver.cloud_mut().push(Particle {
            position: DVec3::splat(0.5),
            cell: 0,
            mass: 0.01,
            u_pdf: DVec3::ZERO,
            u_particle: DVec3::ZERO,
            u_filtered: DVec3::ZERO,
            z,
            rho: 1.0,
            dt: DT,
            shift: DVec3::ZERO,
            ghost: 0,
        });
    }
    let mean = 0.5;
    let spread_of = |driver: &StepDriver| {
        driver
            .cloud()
            .particles()
            .iter()
            .map(|p| (p.z - mean) * (p.z - mean))
            .sum::<f64>()
    };

    let initial = spread_of(&driver);
    let mut previous = initial;
    for _ in 0..10 {
        driver.advance(&flow, |_| {}).unwrap();
        let current = spread_of(&driver);
        assert!(
            current < previous + 1.0e-12,
            "scalar spread must not grow under IEM"
        );
        previous = current;
    }
    // Decay factor per step: Cmix/2 * omega * dt = 0.2, so after 10 steps
    // the spread shrinks by (0.8^10)^2 ~ 0.011.
    assert!(
        previous < 0.05 * initial,
        "IEM decay too weak: {previous} vs initial {initial}"
    );

    // The mass-weighted mean itself is conserved by IEM.
    let final_mean: f64 = driver
        .cloud()
        .particles()
        .iter()
        .map(|p| p.z)
        .sum::<f64>()
        / driver.cloud().len() as f64;
    assert!((final_mean - mean).abs() < 1.0e-12);
}
