use sensorlib::drivers::{as201, dart, ld2413, ld2451, ld2460};

/// How long a read waits before reporting no input.
const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(10);

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DriverKind {
    As201,
    Ld2451,
    Ld2460,
    Ld2413,
    WsZ,
    Ze,
}

impl DriverKind {
    pub fn baud_rate(&self) -> u32 {
        match self {
            Self::As201 => as201::BAUD_RATE,
            Self::Ld2451 => ld2451::BAUD_RATE,
            Self::Ld2460 => ld2460::BAUD_RATE,
            Self::Ld2413 => ld2413::BAUD_RATE,
            Self::WsZ | Self::Ze => dart::BAUD_RATE,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct SerialPortArgs {
    #[arg(default_value_t = default_serial_port())]
    port: String,
    /// Defaults to the driver's own rate.
    #[arg(short, long)]
    baud: Option<u32>,
    #[arg(long)]
    plain_file: bool,
    #[arg(long)]
    tcp: bool,
}

pub enum SerialPort {
    Serial(std::io::BufWriter<Box<dyn serialport::SerialPort>>),
    File(std::io::BufWriter<std::fs::File>),
    Tcp(std::io::BufWriter<std::net::TcpStream>),
}

pub fn default_serial_port() -> String {
    if let Ok(infos) = serialport::available_ports() {
        for info in infos {
            #[cfg(target_os = "macos")]
            if info.port_name.ends_with(".Bluetooth-Incoming-Port") {
                continue;
            }

            // tty. ports on macos want flow control
            #[cfg(target_os = "macos")]
            if info.port_name.starts_with("/dev/tty.") {
                continue;
            }

            return info.port_name.clone();
        }
    }

    "/dev/ttyUSB0".to_owned()
}

impl std::io::Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Serial(port) => port.get_mut().read(buf),
            Self::File(port) => port.get_mut().read(buf),
            Self::Tcp(port) => port.get_mut().read(buf),
        }
    }
}

impl std::io::Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Serial(port) => port.write(buf),
            Self::File(port) => port.write(buf),
            Self::Tcp(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Serial(port) => port.flush(),
            Self::File(port) => port.flush(),
            Self::Tcp(port) => port.flush(),
        }
    }
}

impl SerialPortArgs {
    pub fn open(&self, default_baud: u32) -> anyhow::Result<SerialPort> {
        if self.tcp {
            let port = std::net::TcpStream::connect(&self.port)?;
            port.set_read_timeout(Some(READ_TIMEOUT))?;
            Ok(SerialPort::Tcp(std::io::BufWriter::new(port)))
        } else if self.plain_file {
            let port = std::fs::File::options()
                .read(true)
                .write(true)
                .open(&self.port)?;

            Ok(SerialPort::File(std::io::BufWriter::new(port)))
        } else {
            let baud = self.baud.unwrap_or(default_baud);
            log::info!("opening {} at {} baud", self.port, baud);
            let mut port = serialport::new(&self.port, baud).open()?;
            port.set_timeout(READ_TIMEOUT)?;
            Ok(SerialPort::Serial(std::io::BufWriter::new(port)))
        }
    }
}

/// Blocking delays on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl embedded_hal::delay::DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(ns as u64));
    }
}

/// A sensor that prints everything published to it.
pub fn printer<T>(name: impl Into<String>) -> sensorlib::Sensor<T>
where
    T: std::fmt::Debug + 'static,
{
    let name = name.into();
    sensorlib::Sensor::new(move |v| println!("{}: {:?}", name, v))
}
