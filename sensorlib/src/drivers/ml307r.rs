//! ML307R LTE modem, driven by AT commands.
//!
//! Unsolicited result codes arrive as text lines and are handled by
//! [Driver::poll]. Incoming SMS are announced by `+CMT:` and followed
//! by a line of hex PDU, which is handed to a [PduCodec]. Long
//! messages arrive in parts and are put back together here.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, space0, u32 as decimal};
use nom::combinator::{map, opt, rest, value};
use nom::sequence::{preceded, separated_pair};
use nom::IResult;

use crate::exchange::{self, Blocking, Exchange, ExchangeError};
use crate::time::{elapsed, Clock, DurationExtU32, Instant, MillisDuration};
use crate::{ByteSource, Driver, Error, Health, Sensor};

pub const BAUD_RATE: u32 = 115200;

/// Lines longer than this are thrown away.
pub const MAX_LINE: usize = 500;

/// In-flight long messages kept at once.
pub const MAX_MESSAGES: usize = 5;
/// Parts kept per long message.
pub const MAX_PARTS: usize = 10;
/// Long messages still missing parts after this are delivered anyway.
pub const CONCAT_TIMEOUT: MillisDuration = MillisDuration::millis(30_000);

pub const DEFAULT_PING_HOST: &str = "8.8.8.8";

const CTRL_Z: u8 = 0x1a;

/// Concatenation header of one part of a long message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Concat {
    pub reference: u16,
    /// Counting from 1.
    pub part: u8,
    pub total: u8,
}

/// A decoded SMS, or one part of a long one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sms {
    pub sender: String,
    /// `YYMMDDhhmmss`, as the network sent it.
    pub timestamp: String,
    pub text: String,
    pub concat: Option<Concat>,
}

/// An encoded outgoing SMS.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pdu {
    /// Length given to `AT+CMGS`, in octets, not counting the SMSC.
    pub length: usize,
    /// The PDU as hex text.
    pub hex: String,
}

/// SMS PDU encoder and decoder, provided by the host.
pub trait PduCodec {
    type Error: core::fmt::Debug;

    fn decode(&mut self, pdu: &str) -> Result<Sms, Self::Error>;

    fn encode(&mut self, number: &str, text: &str) -> Result<Pdu, Self::Error>;
}

/// A complete message, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    pub sender: String,
    pub timestamp: String,
    pub text: String,
}

impl From<Sms> for Message {
    fn from(sms: Sms) -> Self {
        Self {
            sender: sms.sender,
            timestamp: sms.timestamp,
            text: sms.text,
        }
    }
}

/// Render a `YYMMDDhhmmss` timestamp as `20YY-MM-DD hh:mm:ss`.
///
/// Anything else is returned unchanged.
pub fn format_timestamp(raw: &str) -> String {
    let digits = raw.as_bytes();
    if digits.len() < 12 || !digits[..12].iter().all(u8::is_ascii_digit) {
        return raw.to_string();
    }
    let f = |at: usize| &raw[at..at + 2];
    format!(
        "20{}-{}-{} {}:{}:{}",
        f(0),
        f(2),
        f(4),
        f(6),
        f(8),
        f(10)
    )
}

#[derive(Debug, Clone)]
struct Pending {
    reference: u16,
    sender: String,
    timestamp: String,
    total: u8,
    received: u8,
    started: Instant,
    parts: [Option<String>; MAX_PARTS],
}

impl Pending {
    fn new(sms: &Sms, concat: Concat, now: Instant) -> Self {
        Self {
            reference: concat.reference,
            sender: sms.sender.clone(),
            timestamp: String::new(),
            total: concat.total,
            received: 0,
            started: now,
            parts: Default::default(),
        }
    }

    fn assemble(self) -> Message {
        let mut text = String::new();
        for n in 0..self.total as usize {
            match self.parts.get(n).and_then(Option::as_ref) {
                Some(part) => text.push_str(part),
                None => text.push_str(&format!("[missing seg {}]", n + 1)),
            }
        }
        Message {
            sender: self.sender,
            timestamp: self.timestamp,
            text,
        }
    }
}

/// Reassembles long messages from their parts.
///
/// Parts are matched by reference number and sender. When every slot
/// is taken the oldest message is dropped to make room.
#[derive(Debug, Clone, Default)]
pub struct Reassembly {
    slots: [Option<Pending>; MAX_MESSAGES],
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently waiting for parts.
    pub fn pending(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Add a part. Returns the message if this part completed it.
    pub fn insert(&mut self, sms: Sms, concat: Concat, now: Instant) -> Option<Message> {
        let slot = self.slot(&sms, concat, now);
        let pending = self.slots[slot].as_mut()?;

        let index = (concat.part as usize).wrapping_sub(1);
        match pending.parts.get_mut(index) {
            Some(part) if part.is_none() => {
                *part = Some(sms.text);
                pending.received += 1;
                if pending.received == 1 {
                    pending.timestamp = sms.timestamp;
                }
            }
            Some(_) => log::debug!("duplicate part {} of sms {}", concat.part, concat.reference),
            None => log::warn!("sms part {} out of range", concat.part),
        }

        if pending.received >= pending.total {
            self.slots[slot].take().map(Pending::assemble)
        } else {
            None
        }
    }

    /// Give up waiting on messages older than `timeout`, returning
    /// whatever arrived of them.
    pub fn expire(&mut self, now: Instant, timeout: MillisDuration) -> Vec<Message> {
        let mut done = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|p| elapsed(p.started, now, timeout)) {
                if let Some(pending) = slot.take() {
                    log::warn!("long sms timed out, delivering what arrived");
                    done.push(pending.assemble());
                }
            }
        }
        done
    }

    fn slot(&mut self, sms: &Sms, concat: Concat, now: Instant) -> usize {
        let found = self.slots.iter().position(|s| {
            s.as_ref()
                .is_some_and(|p| p.reference == concat.reference && p.sender == sms.sender)
        });
        if let Some(i) = found {
            return i;
        }

        let slot = match self.slots.iter().position(Option::is_none) {
            Some(i) => i,
            None => {
                let (i, _) = self
                    .slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| s.as_ref().map(|p| (i, p.started)))
                    .min_by_key(|(_, started)| *started)
                    .unwrap_or((0, now));
                log::warn!("too many long sms in flight, dropping the oldest");
                i
            }
        };
        self.slots[slot] = Some(Pending::new(sms, concat, now));
        slot
    }
}

/// Accumulates text lines.
#[derive(Debug, Clone, Default)]
pub struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one byte. Returns a line when `\n` ends a non-empty one.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\n' => {
                let line = core::mem::take(&mut self.buf);
                if line.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(&line).into_owned())
                }
            }
            b'\r' => None,
            _ => {
                self.buf.push(byte);
                if self.buf.len() > MAX_LINE {
                    log::warn!("line longer than {} bytes, dropped", MAX_LINE);
                    self.buf.clear();
                }
                None
            }
        }
    }
}

/// Unsolicited result codes we act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Urc {
    /// An SMS PDU follows on the next line.
    Sms,
    SignalQuality { rssi: u32, ber: Option<u32> },
    Attached(bool),
}

impl Urc {
    pub fn parse(line: &str) -> Option<Self> {
        fn urc(input: &str) -> IResult<&str, Urc> {
            alt((
                value(Urc::Sms, tag("+CMT:")),
                map(
                    preceded(
                        tag("+CSQ:"),
                        preceded(space0, separated_pair(decimal, char(','), opt(decimal))),
                    ),
                    |(rssi, ber)| Urc::SignalQuality { rssi, ber },
                ),
                map(preceded(tag("+CGATT:"), rest), |r: &str| {
                    Urc::Attached(r.contains('1'))
                }),
            ))(input)
        }

        urc(line).ok().map(|(_, u)| u)
    }
}

fn is_hex(line: &str) -> bool {
    !line.is_empty() && line.bytes().all(|b| b.is_ascii_hexdigit())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    apn: String,
    attach_retries: u8,
    command_timeout: MillisDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apn: String::new(),
            attach_retries: 30,
            command_timeout: 1000.millis(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access point name. Empty means the network picks.
    pub fn apn(mut self, apn: &str) -> Self {
        self.apn = apn.to_string();
        self
    }

    pub fn get_apn(&self) -> &str {
        &self.apn
    }

    /// How many times setup asks whether the network is attached.
    pub fn attach_retries(mut self, retries: u8) -> Self {
        self.attach_retries = retries;
        self
    }

    pub fn get_attach_retries(&self) -> u8 {
        self.attach_retries
    }

    /// Default wait for `OK`.
    pub fn command_timeout(mut self, timeout: MillisDuration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn get_command_timeout(&self) -> MillisDuration {
        self.command_timeout
    }
}

/// Why an SMS was not sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsError<E, C> {
    Encode(C),
    Modem(Error<E>),
}

impl<E, C> From<Error<E>> for SmsError<E, C> {
    fn from(other: Error<E>) -> Self {
        Self::Modem(other)
    }
}

impl<E, C> core::fmt::Display for SmsError<E, C>
where
    E: core::fmt::Debug,
    C: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "pdu encoding failed: {:?}", e),
            Self::Modem(e) => write!(f, "{}", e),
        }
    }
}

#[cfg(feature = "std")]
impl<E, C> std::error::Error for SmsError<E, C>
where
    E: core::fmt::Debug,
    C: core::fmt::Debug,
{
}

#[derive(Debug, Default)]
pub struct Sensors {
    pub sms_sender: Sensor<String>,
    pub sms_text: Sensor<String>,
    /// `20YY-MM-DD hh:mm:ss`.
    pub sms_timestamp: Sensor<String>,
    /// dBm.
    pub signal_strength: Sensor<i32>,
    pub network_attached: Sensor<bool>,
    pub online: Sensor<bool>,
    pub version: Sensor<String>,
}

impl Sensors {
    fn publish(&mut self, message: Message) {
        log::info!("sms from {} at {}: {}", message.sender, message.timestamp, message.text);
        self.sms_sender.publish(message.sender);
        self.sms_timestamp
            .publish(format_timestamp(&message.timestamp));
        self.sms_text.publish(message.text);
    }
}

/// ML307R driver.
#[derive(Debug)]
pub struct Ml307r<P, D, T, C> {
    port: P,
    exchange: Blocking<D>,
    clock: T,
    codec: C,
    config: Config,
    lines: LineReader,
    waiting_for_pdu: bool,
    concat: Reassembly,
    received: u32,
    sent: u32,
    health: Health,
    pub sensors: Sensors,
}

impl<P, D, T, C> Ml307r<P, D, T, C>
where
    P: ByteSource + embedded_io::Write,
    D: DelayNs,
    T: Clock,
    C: PduCodec,
{
    pub fn new(port: P, delay: D, clock: T, codec: C, config: Config, sensors: Sensors) -> Self {
        Self {
            port,
            exchange: Blocking::new(delay, config.get_command_timeout())
                .poll(10.millis())
                .baud(BAUD_RATE),
            clock,
            codec,
            config,
            lines: LineReader::new(),
            waiting_for_pdu: false,
            concat: Reassembly::new(),
            received: 0,
            sent: 0,
            health: Health::new(),
            sensors,
        }
    }

    pub fn release(self) -> (P, D, T, C) {
        (self.port, self.exchange.release(), self.clock, self.codec)
    }

    /// Messages received so far. Each long message counts once per part.
    pub fn sms_received(&self) -> u32 {
        self.received
    }

    pub fn sms_sent(&self) -> u32 {
        self.sent
    }

    fn sleep(&mut self, duration: MillisDuration) {
        self.exchange.delay_mut().delay_ms(duration.ticks());
    }

    /// Send a command without waiting for an answer. Pending input is
    /// thrown away first.
    pub fn send_at(&mut self, command: &str) -> Result<(), Error<P::Error>> {
        log::debug!("sending: {}", command);
        exchange::transact(&mut self.port, format!("{}\r", command).as_bytes())
    }

    // read until OK or ERROR, returning everything read
    fn wait_ok(&mut self, timeout: MillisDuration) -> Result<Vec<u8>, Error<P::Error>> {
        let mut response = Vec::new();
        self.exchange.set_timeout(timeout);
        // checked after every byte, so only the tail can newly match
        let result = self.exchange.read_until(&mut self.port, &mut response, |r| {
            r.ends_with(b"OK") || r.ends_with(b"ERROR")
        });
        self.exchange.set_timeout(self.config.get_command_timeout());
        result?;

        if response.ends_with(b"OK") {
            Ok(response)
        } else {
            Err(Error::Exchange(ExchangeError::Rejected))
        }
    }

    /// Send a command and wait for `OK`. An `ERROR` reply is
    /// [ExchangeError::Rejected].
    pub fn send_at_and_wait_ok(
        &mut self,
        command: &str,
        timeout: MillisDuration,
    ) -> Result<Vec<u8>, Error<P::Error>> {
        self.send_at(command)?;
        self.wait_ok(timeout).inspect_err(|e| {
            log::warn!("{} failed: {}", command, e);
        })
    }

    /// Encode and send a text message.
    pub fn send_sms(&mut self, number: &str, text: &str) -> Result<(), SmsError<P::Error, C::Error>> {
        log::info!("sending sms to {}", number);
        let pdu = self.codec.encode(number, text).map_err(|e| {
            log::warn!("pdu encoding failed: {:?}", e);
            SmsError::Encode(e)
        })?;

        self.send_at(&format!("AT+CMGS={}", pdu.length))?;
        self.exchange.set_timeout(5000.millis());
        let mut prompt = Vec::new();
        let result = self
            .exchange
            .read_until(&mut self.port, &mut prompt, |r| r.ends_with(b">"));
        self.exchange.set_timeout(self.config.get_command_timeout());
        result.inspect_err(|_| log::warn!("no > prompt for sms"))?;

        let mut body = pdu.hex.into_bytes();
        body.push(CTRL_Z);
        exchange::send(&mut self.port, &body)?;
        self.wait_ok(30_000.millis()).inspect_err(|e| {
            log::warn!("sms not sent: {}", e);
        })?;

        self.sent += 1;
        log::info!("sms sent");
        Ok(())
    }

    /// Power the modem off. `mode` is passed to `AT+MPOF`.
    pub fn shutdown(&mut self, mode: u8) -> Result<(), Error<P::Error>> {
        self.send_at_and_wait_ok(&format!("AT+MPOF={}", mode), 5000.millis())
            .map(|_| ())
    }

    /// Restart the modem. `mode` is passed to `AT+MREBOOT`.
    pub fn reboot(&mut self, mode: u8) -> Result<(), Error<P::Error>> {
        self.send_at_and_wait_ok(&format!("AT+MREBOOT={}", mode), 5000.millis())
            .map(|_| ())
    }

    /// Read and publish the firmware version.
    pub fn version(&mut self) -> Result<String, Error<P::Error>> {
        let command = "AT+CGMR";
        let response = self.send_at_and_wait_ok(command, 5000.millis())?;
        let text = String::from_utf8_lossy(&response);
        let version = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && *l != command && *l != "OK")
            .unwrap_or_default()
            .to_string();
        log::info!("version: {}", version);
        self.sensors.version.publish(version.clone());
        Ok(version)
    }

    /// Ask for signal strength. The answer arrives through [Driver::poll].
    pub fn query_signal_strength(&mut self) -> Result<(), Error<P::Error>> {
        self.send_at("AT+CSQ")
    }

    /// Ask for network attachment. The answer arrives through [Driver::poll].
    pub fn query_network_status(&mut self) -> Result<(), Error<P::Error>> {
        self.send_at("AT+CGATT?")
    }

    /// Activate the data context, ping `host` four times, and
    /// deactivate it again.
    pub fn ping(&mut self, host: &str) -> Result<(), Error<P::Error>> {
        self.send_at_and_wait_ok("AT+CGACT=1,1", 10_000.millis())?;
        let pinged = self
            .send_at_and_wait_ok(&format!("AT+MPING=1,\"{}\",4,32,255", host), 30_000.millis())
            .map(|_| ());
        self.sleep(5000.millis());
        self.send_at_and_wait_ok("AT+CGACT=0,1", 5000.millis())?;
        pinged
    }

    fn handshake(&mut self) -> bool {
        for attempt in 0..10 {
            if attempt > 0 {
                self.sleep(500.millis());
            }
            if self.send_at_and_wait_ok("AT", 1000.millis()).is_ok() {
                return true;
            }
            log::warn!("no answer to AT, retrying");
        }
        false
    }

    fn wait_attached(&mut self) -> Result<bool, Error<P::Error>> {
        for _ in 0..self.config.get_attach_retries() {
            self.query_network_status()?;
            let attached = match self.wait_ok(1000.millis()) {
                Ok(response) => contains(&response, b"+CGATT: 1"),
                Err(Error::Io(e)) => return Err(Error::Io(e)),
                Err(_) => false,
            };
            if attached {
                return Ok(true);
            }
            self.sleep(1000.millis());
        }
        Ok(false)
    }

    fn process_line(&mut self, line: &str) {
        log::debug!("received: {}", line);

        if self.waiting_for_pdu {
            self.waiting_for_pdu = false;
            if is_hex(line) {
                self.process_pdu(line);
            } else {
                log::warn!("expected a pdu, got: {}", line);
            }
            return;
        }

        match Urc::parse(line) {
            Some(Urc::Sms) => self.waiting_for_pdu = true,
            Some(Urc::SignalQuality { rssi, .. }) if rssi < 99 => {
                self.sensors.signal_strength.publish(rssi as i32 * 2 - 113);
            }
            Some(Urc::SignalQuality { .. }) => log::debug!("signal strength unknown"),
            Some(Urc::Attached(attached)) => self.sensors.network_attached.publish(attached),
            None => {}
        }
    }

    fn process_pdu(&mut self, pdu: &str) {
        let sms = match self.codec.decode(pdu) {
            Ok(sms) => sms,
            Err(e) => {
                log::warn!("pdu decoding failed: {:?}", e);
                return;
            }
        };
        self.received += 1;

        match sms.concat {
            Some(concat) if concat.total > 1 && concat.part > 0 => {
                let now = self.clock.now();
                if let Some(message) = self.concat.insert(sms, concat, now) {
                    self.sensors.publish(message);
                }
            }
            _ => self.sensors.publish(sms.into()),
        }
    }
}

impl<P, D, T, C> Driver for Ml307r<P, D, T, C>
where
    P: ByteSource + embedded_io::Write,
    D: DelayNs,
    T: Clock,
    C: PduCodec,
{
    type Error = Error<P::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        log::info!("starting modem");
        self.sleep(2000.millis());

        if !self.handshake() {
            log::error!("modem does not answer");
            self.health.mark_failed();
            self.sensors.online.publish(false);
            return Err(Error::Failed);
        }

        let apn = format!("AT+CGDCONT=1,\"IP\",\"{}\"", self.config.get_apn());
        if self.send_at_and_wait_ok(&apn, 2000.millis()).is_err() {
            log::warn!("keeping the modem's own APN");
        }
        // report new messages directly, as PDUs
        if self
            .send_at_and_wait_ok("AT+CNMI=2,2,0,0,0", 2000.millis())
            .is_err()
        {
            log::warn!("incoming sms may not be reported");
        }
        if self.send_at_and_wait_ok("AT+CMGF=0", 2000.millis()).is_err() {
            log::warn!("sms may not be in pdu mode");
        }

        if self.wait_attached()? {
            log::info!("network attached");
        } else {
            log::warn!("network not attached");
        }

        self.sensors.online.publish(true);
        self.version()?;
        Ok(())
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        if self.health.is_failed() {
            return Ok(());
        }

        while let Some(b) = self.port.read_byte()? {
            if let Some(line) = self.lines.push(b) {
                self.process_line(&line);
            }
        }

        let now = self.clock.now();
        for message in self.concat.expire(now, CONCAT_TIMEOUT) {
            self.sensors.publish(message);
        }
        Ok(())
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        if self.health.is_failed() {
            return Ok(());
        }
        self.query_signal_strength()
    }

    fn health(&self) -> Health {
        self.health
    }
}
