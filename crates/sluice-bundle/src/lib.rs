//! CommonJS script bundler.
//!
//! Walks the `require()` graph of an entry module, runs every module through a
//! transform chain and packs the result into one self-executing browser script.
//! ES modules are lowered to CommonJS first, so `import` is followed too.
//! Parsing and minification are delegated to oxc.

pub mod deps;
pub mod esm;
pub mod minify;
pub mod prelude;
pub mod resolve;
pub mod session;
pub mod transform;

pub use esm::EsModuleTransform;
pub use minify::minify_js;
pub use resolve::{ResolveError, Resolver};
pub use session::{BuildMode, Bundle, BundleError, BundleSession};
pub use transform::{EnvTransform, Transform, TransformError};
