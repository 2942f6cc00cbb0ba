pub mod encoder;
pub mod enrollment;
pub mod gallery;
pub mod matcher;
pub mod scripted;
pub mod spool;
pub mod store;

pub use encoder::{
    capture_with_deadline, encode_single_face, open_session_with_deadline, validate_embedding,
    BoundingBox, CaptureSession, FaceEmbeddingRecord, FaceEncoder, FaceExtractionSummary,
    RawSample,
};

pub use enrollment::{
    mean_vector, validate_name, EnrollmentOutcome, EnrollmentPipeline, EnrollmentSettings,
    NameLease, NameLocks, PendingEnrollment, MAX_NAME_LEN,
};

pub use gallery::{Gallery, GalleryEntry, GallerySnapshot};

pub use matcher::{
    confidence_from_distance, euclidean_distance, match_against, MatchEngine, MatchOutcome,
    MatchScore, TIE_TOLERANCE,
};

pub use scripted::ScriptedEncoder;
pub use spool::SpoolEncoder;

pub use store::{
    decode_vector, encode_vector, CaptureMetadata, IdentityVector, SqliteVectorStore,
    StoreHealth, StoredVector, VectorStore,
};
