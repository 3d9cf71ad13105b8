use sensorlib::drivers::{as201, dart, ld2413, ld2451, ld2460};
use sensorlib::protocol::{for_each_frame, parse_frame, ChecksumStyle, FrameReader, Framing, MessageParse};

use crate::common::DriverKind;
use crate::hexdump::hexdump;

#[derive(clap::Args, Debug)]
pub struct ParseDumpOpts {
    driver: DriverKind,
    /// Raw bytes captured from the device.
    dump: String,
}

impl crate::ToolRun for ParseDumpOpts {
    fn run(&self) -> anyhow::Result<()> {
        let raw = std::fs::read(&self.dump)?;

        let summary = match self.driver {
            DriverKind::As201 => dump::<_, as201::Reply>(&as201::FRAMING, &raw),
            DriverKind::Ld2451 => dump::<_, ld2451::Upload>(&ld2451::UPLOAD_FRAMING, &raw),
            DriverKind::Ld2460 => dump::<_, ld2460::Reply>(&ld2460::FRAMING, &raw),
            DriverKind::Ld2413 => dump::<_, ld2413::Upload>(&ld2413::UPLOAD_FRAMING, &raw),
            DriverKind::WsZ | DriverKind::Ze => dump::<_, dart::Upload>(&dart::FRAMING, &raw),
        };

        println!(
            "{} frames, {} undecoded, {} malformed, {} bytes of noise",
            summary.frames, summary.undecoded, summary.malformed, summary.noise
        );
        if summary.trailing > 0 {
            println!("{} bytes of an unfinished frame at the end", summary.trailing);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Summary {
    frames: usize,
    undecoded: usize,
    malformed: usize,
    noise: usize,
    trailing: usize,
}

/// Run `data` through a frame reader, printing every frame.
fn dump<C, M>(framing: &Framing<C>, mut data: &[u8]) -> Summary
where
    C: ChecksumStyle + Clone,
    M: for<'a> MessageParse<'a> + std::fmt::Debug,
{
    let mut summary = Summary::default();
    let mut reader = FrameReader::new(framing.clone());

    let seen = for_each_frame(&mut reader, &mut data, |frame| {
        println!("frame, {} bytes:", frame.bytes().len());
        hexdump("  ", frame.bytes());
        match parse_frame::<M>(frame) {
            Ok(msg) => {
                println!("{:#?}", msg);
                summary.frames += 1;
            }
            Err(e) => {
                println!("undecoded: {}", e);
                summary.undecoded += 1;
            }
        }
        println!();
    });
    if let Err(e) = seen {
        match e {}
    }

    summary.malformed = reader.dropped();
    summary.noise = reader.noise();
    summary.trailing = reader.buffered().len();
    summary
}

#[cfg(test)]
mod test {
    use sensorlib::protocol::NoChecksum;

    use super::*;

    fn ld2413_upload(mm: f32) -> Vec<u8> {
        ld2413::UPLOAD_FRAMING.encode(0, 0, &mm.to_le_bytes()).unwrap()
    }

    #[test]
    fn counts_frames_and_noise() {
        let mut data = b"\x00\x11".to_vec();
        data.extend(ld2413_upload(1200.0));
        data.extend(ld2413_upload(800.0));
        let summary = dump::<NoChecksum, ld2413::Upload>(&ld2413::UPLOAD_FRAMING, &data);
        assert_eq!(
            summary,
            Summary {
                frames: 2,
                noise: 2,
                ..Default::default()
            }
        );
    }

    #[test]
    fn noise_between_frames() {
        let mut data = ld2413_upload(1200.0);
        data.extend(b"\x00\x01\x02");
        data.extend(ld2413_upload(800.0));
        data.extend(b"\x33");
        let summary = dump::<NoChecksum, ld2413::Upload>(&ld2413::UPLOAD_FRAMING, &data);
        assert_eq!(
            summary,
            Summary {
                frames: 2,
                noise: 4,
                ..Default::default()
            }
        );
    }

    #[test]
    fn bad_checksum_is_malformed() {
        let mut frame = dart::FRAMING.encode(0, 0x17, &[0x04, 0x00, 0x01, 0x90, 0x00, 0x00]).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        frame.extend(&frame.clone()[..4]);

        let summary = dump::<_, dart::Upload>(&dart::FRAMING, &frame);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.trailing, 4);
    }
}
