//! Constants shared across the engine.
//!
//! Label keys written into built images are a wire contract with every image
//! built before: changing any of them forces a full rebuild of git stages.

/// Separator placed between digest arguments before hashing.
pub const DIGEST_ARGS_SEPARATOR: &str = ":::";

/// Version folded into every stage digest. Bumping it invalidates all caches.
pub const BUILD_CACHE_VERSION: &str = "1.2";

/// Base image name meaning "no base image".
pub const SCRATCH_IMAGE: &str = "scratch";

/// Checksum reported for an import that selects nothing (md5 of empty input).
pub const NOTHING_CHECKSUM: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Default git patch size bucket step (1 MiB).
pub const DEFAULT_PATCH_SIZE_STEP: u64 = 1024 * 1024;

/// Number of leading bytes inspected when deciding whether a blob is binary.
pub const BINARY_DETECTION_LEN: usize = 8000;

/// Prefix shared by all git mapping labels.
pub const GIT_LABEL_PREFIX: &str = "werf-git-";

/// Label holding the semicolon-joined `tmp_dir` service mount points.
pub const MOUNT_TMP_DIR_LABEL: &str = "werf-mount-tmp-dir";

/// Label holding the semicolon-joined `build_dir` service mount points.
pub const MOUNT_BUILD_DIR_LABEL: &str = "werf-mount-build-dir";

/// Prefix of custom mount labels; the escaped source path follows.
pub const MOUNT_CUSTOM_DIR_LABEL_PREFIX: &str = "werf-mount-custom-dir-";

/// Prefix of import checksum labels; the slugified import id follows.
pub const IMPORT_LABEL_PREFIX: &str = "werf-import-";

/// Prefix of dependency labels; the dependency stage id follows.
pub const DEPENDENCY_LABEL_PREFIX: &str = "werf-dependency-";

/// Name of the ignore file honoured when checksumming a build context.
pub const DOCKERIGNORE_FILE: &str = ".dockerignore";
