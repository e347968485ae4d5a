use smol_str::SmolStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeapError {
    #[error("File is truncated: {0} bytes")]
    TruncatedFile(usize),
    #[error("Corrupt page {page}: {reason}")]
    CorruptPage { page: usize, reason: SmolStr },
    #[error("Tuple is truncated: need {needed} bytes, have {available}")]
    TruncatedTuple { needed: usize, available: usize },
    #[error("Corrupt tuple: {0}")]
    CorruptTuple(SmolStr),
    #[error("Unsupported type: {0}")]
    UnsupportedType(SmolStr),
    #[error("Unknown alignment: {0:?}")]
    UnknownAlignment(char),
    #[error("Unsupported varlena encoding: {0}")]
    UnsupportedVarlenaEncoding(SmolStr),
    #[error("Unsupported external field type: {0}")]
    UnsupportedExternalFieldType(SmolStr),
    #[error("Corrupt compressed data: {0}")]
    CorruptCompressedData(SmolStr),
    #[error(
        "Incomplete decompression: produced {produced} of {expected} bytes, \
         consumed {consumed} of {available} source bytes"
    )]
    IncompleteDecompression {
        expected: usize,
        produced: usize,
        consumed: usize,
        available: usize,
    },
    #[error("Corrupt toast value {value_id}: {reason}")]
    CorruptToast { value_id: u32, reason: SmolStr },
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(SmolStr),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(SmolStr),
    #[error("{0} not found: {1}")]
    NotFound(SmolStr, SmolStr),
}
