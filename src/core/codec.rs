//! Purpose: Byte compression backends behind one narrow `Codec` interface.
//! Exports: `Codec`, `CodecId`, `Compression`, `codec_for`, `codec_for_id`, `available_codecs`.
//! Role: The container codec asks for bytes in and bytes out; nothing else depends on a backend.
//! Invariants: A backend compiled out of the build reports unavailable and fails with
//!   `UnsupportedCodec`; availability is probed once per process and cached.
//! Invariants: Codec ids are part of the file format and never renumbered.
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{Error, ErrorKind};

pub const ZSTD_MIN_LEVEL: i32 = 1;
pub const ZSTD_MAX_LEVEL: i32 = 22;
pub const ZSTD_DEFAULT_LEVEL: i32 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CodecId {
    None = 0,
    Default = 1,
    Gzip = 2,
    Lz4 = 10,
    Zstd = 11,
}

impl CodecId {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        Ok(match byte {
            0 => CodecId::None,
            1 => CodecId::Default,
            2 => CodecId::Gzip,
            10 => CodecId::Lz4,
            11 => CodecId::Zstd,
            other => {
                return Err(Error::new(ErrorKind::Format)
                    .with_message(format!("unknown codec id {other}")));
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Default => "default",
            CodecId::Gzip => "gzip",
            CodecId::Lz4 => "lz4",
            CodecId::Zstd => "zstd",
        }
    }
}

/// Compression selected for a save.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Default,
    Gzip,
    Lz4,
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

fn default_zstd_level() -> i32 {
    ZSTD_DEFAULT_LEVEL
}

impl Compression {
    pub fn id(self) -> CodecId {
        match self {
            Compression::None => CodecId::None,
            Compression::Default => CodecId::Default,
            Compression::Gzip => CodecId::Gzip,
            Compression::Lz4 => CodecId::Lz4,
            Compression::Zstd { .. } => CodecId::Zstd,
        }
    }

    pub fn validate(self) -> Result<Self, Error> {
        match self {
            Compression::Zstd { level } if !(ZSTD_MIN_LEVEL..=ZSTD_MAX_LEVEL).contains(&level) => {
                Err(Error::new(ErrorKind::Argument)
                    .with_message(format!("zstd level {level} outside {ZSTD_MIN_LEVEL}..={ZSTD_MAX_LEVEL}")))
            }
            _ => Ok(self),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    /// `none`, `default`, `gzip`, `lz4`, `zstd` or `zstd:<level>`.
    fn from_str(input: &str) -> Result<Self, Error> {
        let lower = input.trim().to_ascii_lowercase();
        let (name, level) = match lower.split_once(':') {
            Some((name, level)) => (name, Some(level)),
            None => (lower.as_str(), None),
        };
        let compression = match (name, level) {
            ("none", None) => Compression::None,
            ("default", None) => Compression::Default,
            ("gzip", None) => Compression::Gzip,
            ("lz4", None) => Compression::Lz4,
            ("zstd", None) => Compression::Zstd {
                level: ZSTD_DEFAULT_LEVEL,
            },
            ("zstd", Some(level)) => Compression::Zstd {
                level: level.parse().map_err(|_| {
                    Error::new(ErrorKind::Argument).with_message(format!("invalid zstd level `{level}`"))
                })?,
            },
            _ => {
                return Err(Error::new(ErrorKind::Argument)
                    .with_message(format!("unknown compression `{input}`"))
                    .with_hint("Use none, default, gzip, lz4, zstd or zstd:<1-22>."));
            }
        };
        compression.validate()
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Zstd { level } => write!(f, "zstd:{level}"),
            other => f.write_str(other.id().name()),
        }
    }
}

pub trait Codec: Send + Sync {
    fn id(&self) -> CodecId;

    fn is_available(&self) -> bool;

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, Error>;

    fn decompress(&self, packed: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Codec that writes `compression`, failing if its backend is unavailable.
pub fn codec_for(compression: Compression) -> Result<Option<Box<dyn Codec>>, Error> {
    let codec: Box<dyn Codec> = match compression.validate()? {
        Compression::None => return Ok(None),
        Compression::Default => Box::new(Zlib),
        Compression::Gzip => Box::new(Gzip),
        Compression::Lz4 => Box::new(Lz4),
        Compression::Zstd { level } => Box::new(Zstd { level }),
    };
    if !codec.is_available() {
        return Err(unsupported(codec.id()));
    }
    Ok(Some(codec))
}

/// Codec that reads chunks written under `id`.
pub fn codec_for_id(id: CodecId) -> Result<Option<Box<dyn Codec>>, Error> {
    codec_for(match id {
        CodecId::None => Compression::None,
        CodecId::Default => Compression::Default,
        CodecId::Gzip => Compression::Gzip,
        CodecId::Lz4 => Compression::Lz4,
        CodecId::Zstd => Compression::Zstd {
            level: ZSTD_DEFAULT_LEVEL,
        },
    })
}

/// Every codec id usable in this build.
pub fn available_codecs() -> Vec<CodecId> {
    [CodecId::None, CodecId::Default, CodecId::Gzip, CodecId::Lz4, CodecId::Zstd]
        .into_iter()
        .filter(|id| codec_for_id(*id).is_ok())
        .collect()
}

fn unsupported(id: CodecId) -> Error {
    Error::new(ErrorKind::UnsupportedCodec)
        .with_message(format!("{} compression is not available in this build", id.name()))
        .with_hint("Rebuild with the matching cargo feature (deflate, lz4, zstd) or pick another codec.")
}

fn backend_error(id: CodecId, action: &str, err: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::new(ErrorKind::Format)
        .with_message(format!("{} {action} failed", id.name()))
        .with_source(err)
}

const PROBE_SAMPLE: &[u8] = b"rim codec probe rim codec probe rim codec probe";

/// Round-trips a sample once; a failure is logged and remembered.
fn probe(cell: &'static OnceLock<bool>, codec: &dyn Codec) -> bool {
    *cell.get_or_init(|| {
        let outcome = codec
            .compress(PROBE_SAMPLE)
            .and_then(|packed| codec.decompress(&packed));
        match outcome {
            Ok(raw) if raw == PROBE_SAMPLE => true,
            Ok(_) => {
                warn!(codec = codec.id().name(), "codec probe returned different bytes; disabling");
                false
            }
            Err(err) => {
                warn!(codec = codec.id().name(), error = %err, "codec probe failed; disabling");
                false
            }
        }
    })
}

/// `Default` codec: zlib-wrapped deflate.
struct Zlib;

impl Codec for Zlib {
    fn id(&self) -> CodecId {
        CodecId::Default
    }

    fn is_available(&self) -> bool {
        static PROBED: OnceLock<bool> = OnceLock::new();
        cfg!(feature = "deflate") && probe(&PROBED, self)
    }

    #[cfg(feature = "deflate")]
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        use std::io::Write;
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(raw)
            .and_then(|()| encoder.finish())
            .map_err(|err| backend_error(self.id(), "compress", err))
    }

    #[cfg(feature = "deflate")]
    fn decompress(&self, packed: &[u8]) -> Result<Vec<u8>, Error> {
        use std::io::Read;
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(packed)
            .read_to_end(&mut out)
            .map_err(|err| backend_error(self.id(), "decompress", err))?;
        Ok(out)
    }

    #[cfg(not(feature = "deflate"))]
    fn compress(&self, _raw: &[u8]) -> Result<Vec<u8>, Error> {
        Err(unsupported(self.id()))
    }

    #[cfg(not(feature = "deflate"))]
    fn decompress(&self, _packed: &[u8]) -> Result<Vec<u8>, Error> {
        Err(unsupported(self.id()))
    }
}

struct Gzip;

impl Codec for Gzip {
    fn id(&self) -> CodecId {
        CodecId::Gzip
    }

    fn is_available(&self) -> bool {
        static PROBED: OnceLock<bool> = OnceLock::new();
        cfg!(feature = "deflate") && probe(&PROBED, self)
    }

    #[cfg(feature = "deflate")]
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(raw)
            .and_then(|()| encoder.finish())
            .map_err(|err| backend_error(self.id(), "compress", err))
    }

    #[cfg(feature = "deflate")]
    fn decompress(&self, packed: &[u8]) -> Result<Vec<u8>, Error> {
        use std::io::Read;
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(packed)
            .read_to_end(&mut out)
            .map_err(|err| backend_error(self.id(), "decompress", err))?;
        Ok(out)
    }

    #[cfg(not(feature = "deflate"))]
    fn compress(&self, _raw: &[u8]) -> Result<Vec<u8>, Error> {
        Err(unsupported(self.id()))
    }

    #[cfg(not(feature = "deflate"))]
    fn decompress(&self, _packed: &[u8]) -> Result<Vec<u8>, Error> {
        Err(unsupported(self.id()))
    }
}

/// LZ4 block with the raw length prepended.
struct Lz4;

impl Codec for Lz4 {
    fn id(&self) -> CodecId {
        CodecId::Lz4
    }

    fn is_available(&self) -> bool {
        static PROBED: OnceLock<bool> = OnceLock::new();
        cfg!(feature = "lz4") && probe(&PROBED, self)
    }

    #[cfg(feature = "lz4")]
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(lz4_flex::compress_prepend_size(raw))
    }

    #[cfg(feature = "lz4")]
    fn decompress(&self, packed: &[u8]) -> Result<Vec<u8>, Error> {
        lz4_flex::decompress_size_prepended(packed).map_err(|err| backend_error(self.id(), "decompress", err))
    }

    #[cfg(not(feature = "lz4"))]
    fn compress(&self, _raw: &[u8]) -> Result<Vec<u8>, Error> {
        Err(unsupported(self.id()))
    }

    #[cfg(not(feature = "lz4"))]
    fn decompress(&self, _packed: &[u8]) -> Result<Vec<u8>, Error> {
        Err(unsupported(self.id()))
    }
}

struct Zstd {
    #[cfg_attr(not(feature = "zstd"), allow(dead_code))]
    level: i32,
}

impl Codec for Zstd {
    fn id(&self) -> CodecId {
        CodecId::Zstd
    }

    fn is_available(&self) -> bool {
        static PROBED: OnceLock<bool> = OnceLock::new();
        cfg!(feature = "zstd") && probe(&PROBED, self)
    }

    #[cfg(feature = "zstd")]
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        zstd::encode_all(raw, self.level).map_err(|err| backend_error(self.id(), "compress", err))
    }

    #[cfg(feature = "zstd")]
    fn decompress(&self, packed: &[u8]) -> Result<Vec<u8>, Error> {
        zstd::decode_all(packed).map_err(|err| backend_error(self.id(), "decompress", err))
    }

    #[cfg(not(feature = "zstd"))]
    fn compress(&self, _raw: &[u8]) -> Result<Vec<u8>, Error> {
        Err(unsupported(self.id()))
    }

    #[cfg(not(feature = "zstd"))]
    fn decompress(&self, _packed: &[u8]) -> Result<Vec<u8>, Error> {
        Err(unsupported(self.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::{CodecId, Compression, available_codecs, codec_for, codec_for_id};
    use crate::core::error::ErrorKind;

    #[test]
    fn ids_are_stable() {
        for (id, byte) in [
            (CodecId::None, 0),
            (CodecId::Default, 1),
            (CodecId::Gzip, 2),
            (CodecId::Lz4, 10),
            (CodecId::Zstd, 11),
        ] {
            assert_eq!(id.as_byte(), byte);
            assert_eq!(CodecId::from_byte(byte).expect("id"), id);
        }
        assert_eq!(CodecId::from_byte(3).expect_err("unknown").kind(), ErrorKind::Format);
    }

    #[test]
    fn parses_compression_flags() {
        assert_eq!("none".parse::<Compression>().expect("none"), Compression::None);
        assert_eq!("LZ4".parse::<Compression>().expect("lz4"), Compression::Lz4);
        assert_eq!(
            "zstd:19".parse::<Compression>().expect("zstd"),
            Compression::Zstd { level: 19 }
        );
        assert_eq!("zstd:0".parse::<Compression>().expect_err("level").kind(), ErrorKind::Argument);
        assert_eq!("brotli".parse::<Compression>().expect_err("name").kind(), ErrorKind::Argument);
        assert_eq!("gzip:4".parse::<Compression>().expect_err("level").kind(), ErrorKind::Argument);
        assert_eq!(Compression::Zstd { level: 7 }.to_string(), "zstd:7");
    }

    #[test]
    fn compression_config_is_serde_tagged() {
        let parsed: Compression = serde_json::from_str(r#"{"codec":"zstd"}"#).expect("json");
        assert_eq!(parsed, Compression::Zstd { level: 3 });
        let json = serde_json::to_string(&Compression::Gzip).expect("json");
        assert_eq!(json, r#"{"codec":"gzip"}"#);
    }

    #[test]
    fn available_codecs_round_trip() {
        let sample: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        for id in available_codecs() {
            let Some(codec) = codec_for_id(id).expect("available") else {
                assert_eq!(id, CodecId::None);
                continue;
            };
            let packed = codec.compress(&sample).expect("compress");
            assert!(packed.len() < sample.len(), "{} should shrink repetitive input", id.name());
            assert_eq!(codec.decompress(&packed).expect("decompress"), sample);
        }
    }

    #[test]
    fn compiled_out_codecs_are_unsupported() {
        let checks = [
            (cfg!(feature = "deflate"), Compression::Gzip),
            (cfg!(feature = "lz4"), Compression::Lz4),
            (cfg!(feature = "zstd"), Compression::Zstd { level: 3 }),
        ];
        for (compiled, compression) in checks {
            let result = codec_for(compression);
            if compiled {
                assert!(result.is_ok());
            } else {
                let kind = result.err().map(|err| err.kind());
                assert_eq!(kind, Some(ErrorKind::UnsupportedCodec));
            }
        }
    }

    #[test]
    fn garbage_fails_to_decompress() {
        if let Ok(Some(codec)) = codec_for(Compression::Default) {
            let err = codec.decompress(b"definitely not zlib").expect_err("garbage");
            assert_eq!(err.kind(), ErrorKind::Format);
        }
    }
}
