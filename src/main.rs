use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use crossing_sim::math::Point3d;
use crossing_sim::sandbox::{FlatWorld, GroundBox};
use crossing_sim::{
    cgmath::{EuclideanSpace, Vector3},
    ControlMode, EhmiCatalog, EhmiMode, LookupStatus, ParticipantTable, ScenarioCatalog,
    SessionPlan, SignalGroup, SignalTiming, SimEvent, Simulation, SpawnPointAttributes,
    SpawnSettings, TrafficLightAttributes, TrafficLightId, TurnMarkers, VehicleKind, Volume,
};
use log::info;

/// Walking speed of the demo pedestrian in m/s.
const WALK_SPEED: f64 = 1.4;
/// Half the width of the road in m.
const KERB: f64 = 6.0;

#[derive(Parser)]
#[command(name = "crossing-sim")]
#[command(about = "Headless signalised crossing with pooled vehicles")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "1200")]
    ticks: u32,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.05")]
    delta: f64,

    /// Seed of the random spawn cadence
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Cycle the lights on a timer instead of on button presses
    #[arg(long)]
    automatic: bool,

    /// When the pedestrian presses the crossing button, in s
    #[arg(long, default_value = "5.0")]
    press_at: f64,

    /// The eHMI shown by autonomous vehicles
    #[arg(long, default_value = "Intention")]
    ehmi: EhmiMode,

    /// Directory holding scene_config.csv, ehmi_config.csv and avhmi_ID_List.csv
    #[arg(long)]
    config: Option<PathBuf>,

    /// Participant whose session should be printed
    #[arg(long)]
    participant: Option<String>,

    /// Append the experiment log to this CSV file
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,crossing_sim=info"),
    )
    .init();
    let cli = Cli::parse();

    if let Some(dir) = &cli.config {
        print_session(dir, cli.participant.as_deref().unwrap_or_default())?;
    }

    let mut demo = Demo::build(&cli);
    run(&mut demo, &cli);

    if let Some(path) = &cli.log {
        demo.sim
            .log()
            .append_csv(path, "crossing-sim demo")
            .with_context(|| format!("writing the experiment log to {}", path.display()))?;
        println!("Experiment log appended to {}", path.display());
    }
    Ok(())
}

/// Resolves and prints the scenes a participant will run.
fn print_session(dir: &std::path::Path, participant: &str) -> anyhow::Result<()> {
    let scenes = ScenarioCatalog::from_path(&dir.join("scene_config.csv"))?;
    let ehmis = EhmiCatalog::from_path(&dir.join("ehmi_config.csv"))?;
    let table = ParticipantTable::from_path(&dir.join("avhmi_ID_List.csv"))?;

    let status = table.lookup(participant);
    println!("{}", status.message());
    if let LookupStatus::Found(entries) = status {
        let mut plan = SessionPlan::resolve(&entries, &scenes, &ehmis)?;
        let mut current = plan.current().map(|(scene, mode)| (scene.to_string(), mode));
        while let Some((scene, mode)) = current {
            println!("  {:>2}. {scene} ({})", plan.index() + 1, mode.name());
            current = plan.next().map(|(scene, mode)| (scene.to_string(), mode));
        }
    }
    Ok(())
}

/// A two-lane road crossed by a signalised pedestrian crossing at z = 0.
struct Demo {
    sim: Simulation,
    world: FlatWorld,
    light: TrafficLightId,
    pedestrian: Point3d,
    crossing: bool,
    crossed: bool,
}

impl Demo {
    fn build(cli: &Cli) -> Self {
        let mut sim = Simulation::with_seed(cli.seed);
        let mut world = FlatWorld::new();
        let p = |x: f64, z: f64| Point3d::new(x, 0.0, z);

        let north = sim
            .network_mut()
            .add_route_through(&[(p(1.75, -20.0), TurnMarkers::NONE), (p(1.75, 60.0), TurnMarkers::NONE)]);
        let south = sim
            .network_mut()
            .add_route_through(&[(p(-1.75, 20.0), TurnMarkers::NONE), (p(-1.75, -60.0), TurnMarkers::NONE)]);

        let light = sim.add_traffic_light(&TrafficLightAttributes {
            position: p(KERB, 0.0),
            axis: Vector3::unit_z(),
            stop_line_offset: 3.0,
            group: SignalGroup::Group1,
            has_button: true,
        });
        let opposite = sim.add_traffic_light(&TrafficLightAttributes {
            position: p(-KERB, 0.0),
            axis: -Vector3::unit_z(),
            stop_line_offset: 3.0,
            group: SignalGroup::Group1,
            has_button: true,
        });
        let side_road = sim.add_traffic_light(&TrafficLightAttributes {
            position: p(KERB, 12.0),
            axis: Vector3::unit_x(),
            stop_line_offset: 3.0,
            group: SignalGroup::Group2,
            has_button: false,
        });
        let mode = if cli.automatic {
            ControlMode::Automatic
        } else {
            ControlMode::Manual
        };
        sim.add_controller(
            SignalTiming {
                mode,
                ..Default::default()
            },
            &[light, opposite, side_road],
        );

        let zebra = sim.add_zebra_crossing();
        world.add_trigger(
            Volume::ZebraCrossing(zebra),
            GroundBox::around(p(0.0, 0.0), KERB, 1.5),
        );

        for (position, heading, route, light) in [
            (p(1.75, -60.0), Vector3::unit_z(), north, light),
            (p(-1.75, 60.0), -Vector3::unit_z(), south, opposite),
        ] {
            let point = sim.add_spawn_point(SpawnPointAttributes {
                route: Some(route),
                light: Some(light),
                zebra_crossing: Some(zebra),
                ..SpawnPointAttributes::at(position, heading)
            });
            world.add_trigger(Volume::SpawnPoint(point), GroundBox::around(position, 1.5, 3.0));
        }

        sim.add_vehicles(VehicleKind::Autonomous, 4);
        sim.add_vehicles(VehicleKind::Normal, 2);
        sim.set_spawn_settings(Some(SpawnSettings {
            spawn_count: 2,
            ..Default::default()
        }));

        let pedestrian = p(KERB + 1.0, 0.0);
        world.set_pedestrian(Some(pedestrian));
        sim.watch_reaction(light);
        sim.begin_scenario(1, !cli.automatic);

        Self {
            sim,
            world,
            light,
            pedestrian,
            crossing: false,
            crossed: false,
        }
    }

    /// Walks the pedestrian across once the green man shows.
    fn update_pedestrian(&mut self, dt: f64) {
        if self.crossed {
            return;
        }
        if !self.crossing {
            let green_man = self
                .sim
                .lamp_state(self.light)
                .map_or(false, |lamps| lamps.green_man);
            if green_man {
                self.crossing = true;
                self.sim.pedestrian_started_crossing();
            }
            return;
        }
        self.pedestrian.x -= WALK_SPEED * dt;
        if self.pedestrian.x < -KERB - 1.0 {
            self.crossing = false;
            self.crossed = true;
            self.sim.pedestrian_finished_crossing();
            self.world.set_pedestrian(None);
        } else {
            self.world.set_pedestrian(Some(self.pedestrian));
        }
    }
}

fn run(demo: &mut Demo, cli: &Cli) {
    println!("Running {} ticks of {}s (eHMI: {})", cli.ticks, cli.delta, cli.ehmi.name());
    let ticks_per_second = (1.0 / cli.delta).ceil() as u32;
    let mut pressed = false;
    let (mut spawned, mut retired, mut signal_changes) = (0, 0, 0);

    for tick in 1..=cli.ticks {
        if !pressed && demo.sim.time() >= cli.press_at {
            pressed = true;
            let started = demo.sim.press_button();
            info!("Pedestrian pressed the button (cycle started: {started})");
        }
        demo.update_pedestrian(cli.delta);

        for event in demo.world.advance(&mut demo.sim, cli.delta) {
            match event {
                SimEvent::Spawned { .. } => spawned += 1,
                SimEvent::Retired { .. } => retired += 1,
                SimEvent::Signal { .. } => signal_changes += 1,
                SimEvent::Horn { vehicle, cue } => info!("{vehicle:?} horn: {cue:?}"),
                SimEvent::BrakingChanged { .. } => {}
            }
        }

        if tick % (ticks_per_second * 10) == 0 {
            print_summary(demo, cli.ehmi);
        }
    }

    demo.sim.end_scenario();
    println!("=== Final State ===");
    print_summary(demo, cli.ehmi);
    println!("Spawned {spawned}, retired {retired}, {signal_changes} signal events");
    println!("Logged series: {}", demo.sim.log().names().collect::<Vec<_>>().join(", "));
}

fn print_summary(demo: &Demo, ehmi: EhmiMode) {
    let sim = &demo.sim;
    println!("--- t = {:.1}s ---", sim.time());
    for (id, light) in sim.iter_lights() {
        println!("  light {id:?}: {:?} / {:?}", light.colour(), light.pedestrian());
    }
    for vehicle in sim.active_vehicles() {
        let kin = vehicle.kinematics();
        let show = sim.vehicle_presentation(vehicle.id(), ehmi);
        println!(
            "  {:?} {:?} at ({:.1}, {:.1}) speed {:.1} {:?} board {:?}",
            vehicle.kind(),
            vehicle.id(),
            kin.position.x,
            kin.position.z,
            kin.speed(),
            vehicle.braking_state(),
            show.map(|show| show.board),
        );
    }
    if sim.active_vehicles().next().is_none() {
        println!("  no vehicles on the road (pedestrian at {:?})", demo.world.pedestrian().map(|p| p.to_vec()));
    }
}
