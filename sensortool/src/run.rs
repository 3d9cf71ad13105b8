use sensorlib::drivers::{as201, dart, ld2413, ld2451, ld2460};
use sensorlib::port::StdPort;
use sensorlib::Driver;

use crate::common::{printer, DriverKind, SerialPortArgs, StdDelay};

#[derive(clap::Args, Debug)]
pub struct RunOpts {
    driver: DriverKind,
    #[command(flatten)]
    port: SerialPortArgs,

    /// Milliseconds between periodic updates.
    #[arg(short, long, default_value_t = 1000)]
    interval: u64,
}

impl crate::ToolRun for RunOpts {
    fn run(&self) -> anyhow::Result<()> {
        let port = StdPort::new(self.port.open(self.driver.baud_rate())?);
        let interval = std::time::Duration::from_millis(self.interval);

        match self.driver {
            DriverKind::As201 => {
                let sensors = as201::Sensors {
                    angle: ["roll", "pitch", "yaw"].map(printer),
                    temperature: printer("temperature"),
                    pressure: printer("pressure"),
                    height: printer("height"),
                    version: printer("version"),
                    ..Default::default()
                };
                drive(as201::As201::new(port, sensors), interval)
            }

            DriverKind::Ld2451 => {
                let mut sensors = ld2451::Sensors {
                    count: printer("count"),
                    approaching: printer("approaching"),
                    version: printer("version"),
                    ..Default::default()
                };
                for (i, target) in sensors.targets.iter_mut().enumerate() {
                    target.distance = printer(format!("target {} distance", i));
                    target.speed = printer(format!("target {} speed", i));
                    target.angle = printer(format!("target {} angle", i));
                }
                let config = ld2451::Config::new();
                drive(
                    ld2451::Ld2451::new(port, StdDelay, config, sensors),
                    interval,
                )
            }

            DriverKind::Ld2460 => {
                let mut sensors = ld2460::Sensors {
                    count: printer("count"),
                    presence: printer("presence"),
                    version: printer("version"),
                    mode: printer("mode"),
                    ..Default::default()
                };
                for (i, (x, y)) in sensors.x.iter_mut().zip(sensors.y.iter_mut()).enumerate() {
                    *x = printer(format!("target {} x", i));
                    *y = printer(format!("target {} y", i));
                }
                drive(ld2460::Ld2460::new(port, sensors), interval)
            }

            DriverKind::Ld2413 => {
                let sensors = ld2413::Sensors {
                    distance: printer("distance"),
                };
                let config = ld2413::Config::new();
                drive(
                    ld2413::Ld2413::new(port, StdDelay, config, sensors),
                    interval,
                )
            }

            DriverKind::WsZ | DriverKind::Ze => {
                let variant = if self.driver == DriverKind::WsZ {
                    dart::Variant::WsZ
                } else {
                    dart::Variant::Ze
                };
                let sensors = dart::Sensors {
                    concentration: printer("concentration"),
                    ppb: printer("ppb"),
                };
                let config = dart::Config::new();
                drive(
                    dart::Dart::new(port, StdDelay, variant, config, sensors),
                    interval,
                )
            }
        }
    }
}

/// Set up, then poll forever, updating every `interval`.
fn drive<D>(mut driver: D, interval: std::time::Duration) -> anyhow::Result<()>
where
    D: Driver,
    D::Error: std::fmt::Debug,
{
    if let Err(e) = driver.setup() {
        log::error!("setup: {:?}", e);
    }
    if driver.health().is_failed() {
        anyhow::bail!("driver failed during setup");
    }

    let mut last_update: Option<std::time::Instant> = None;
    loop {
        if let Err(e) = driver.poll() {
            log::warn!("poll: {:?}", e);
        }

        if last_update.map_or(true, |t| t.elapsed() >= interval) {
            last_update = Some(std::time::Instant::now());
            if let Err(e) = driver.update() {
                log::warn!("update: {:?}", e);
            }
            if driver.health().is_warning() {
                log::warn!("driver reports a warning");
            }
        }

        // plain files never time out
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}
