//! Procedural macros for the loom agent orchestration engine.
//!
//! - [`tool`] - Attribute macro for converting functions into `loom::tool::Tool` implementations

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{ItemFn, parse_macro_input};

mod tool;

/// Attribute macro that transforms a function into a `loom::tool::Tool`.
///
/// This macro generates a unit struct implementing the `Tool` trait, a
/// parameters struct deserialized from the function's arguments, and a
/// static instance of the tool, so that a plain function can be registered
/// with a `ToolManager` without hand-writing the trait boilerplate.
///
/// # Arguments
///
/// - `description` - Optional description of the tool for LLM context
/// - `params(...)` - Optional parameter descriptions for each argument
/// - `required(...)` - List of required parameters
///
/// # Examples
///
/// ## Basic Usage
/// ```rust,ignore
/// use loom_derive::tool;
///
/// #[tool]
/// async fn add(a: i64, b: i64) -> Result<i64, loom::error::ToolError> {
///     Ok(a + b)
/// }
/// ```
///
/// ## With Description and Parameter Docs
/// ```rust,ignore
/// #[tool(
///     description = "Perform basic arithmetic operations",
///     params(x = "First operand", y = "Second operand", op = "add, sub, mul, or div"),
///     required(x, y, op)
/// )]
/// async fn calculator(x: f64, y: f64, op: String) -> Result<f64, loom::error::ToolError> {
///     match op.as_str() {
///         "add" => Ok(x + y),
///         "sub" => Ok(x - y),
///         _ => Err(loom::error::ToolError::InvalidArguments(format!("unknown op {op}"))),
///     }
/// }
/// ```
///
/// # Generated Code
///
/// For a function `my_tool`, this macro generates:
/// - `MyToolArgs` - A struct for deserializing arguments
/// - `MyTool` - A unit struct implementing `loom::tool::Tool`
/// - `MY_TOOL` - A static instance of the tool
#[proc_macro_attribute]
pub fn tool(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as tool::ToolMacroArgs);
    let input_fn = parse_macro_input!(input as ItemFn);

    tool::expand_tool(args, input_fn)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
