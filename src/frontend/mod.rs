pub mod attribute;
pub mod block;
pub mod builtins;
pub mod env;
pub mod for_each;
pub mod json;
pub mod reference;
pub mod value;

use anyhow::{Context as _, Result};
use hcl::expr::Expression;

pub use attribute::Attribute;
pub use block::{Block, BlockArena, BlockId, Instance};
pub use builtins::create_context;
pub use reference::{RefKey, RefKind, Reference};
pub use value::Resolved;

/// Parse a standalone expression such as `"hcl-${count.index}"` or `[1, 2]`.
pub fn parse_expression(src: &str) -> Result<Expression> {
    let body: hcl::Body =
        hcl::from_str(&format!("v = {src}\n")).with_context(|| format!("invalid expression {src:?}"))?;
    body.attributes()
        .find(|a| a.key() == "v")
        .map(|a| a.expr().clone())
        .with_context(|| format!("invalid expression {src:?}"))
}
