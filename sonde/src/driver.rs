//! Tying the pipeline together: source loading, imports, diagnostics, and
//! the high-level parse entry points.

use std::io::Write;
use std::path::{Path, PathBuf};

use codespan_reporting::diagnostic::Diagnostic;
use codespan_reporting::term::termcolor::{BufferedStandardStream, ColorChoice, WriteColor};

use crate::core::binary::{BinaryError, Machine};
use crate::core::pretty;
use crate::core::resolve::{self, ResolveError};
use crate::core::value::Value;
use crate::core::{TypeId, Types};
use crate::files::{FileId, Files};
use crate::source::StringInterner;
use crate::surface::{self, Body, BranchArm, Item, ParseMessage, Type};

/// Knobs for a parse run.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Where `!save` writes its files. Saving fails without one.
    pub output_dir: Option<PathBuf>,
    /// Capture per-field errors instead of aborting the parse.
    pub lenient: bool,
    /// Attach dotted paths to every value's provenance.
    pub rich: bool,
}

#[derive(Debug)]
pub enum Error {
    Syntax(ParseMessage),
    Resolve(ResolveError),
    Binary(BinaryError),
    Io(std::io::Error),
    Import { module: String, message: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Syntax(message) => write!(f, "{}", message.to_diagnostic().message),
            Error::Resolve(error) => write!(f, "{error}"),
            Error::Binary(error) => write!(f, "{error}"),
            Error::Io(error) => write!(f, "{error}"),
            Error::Import { module, message } => {
                write!(f, "cannot import `{module}`: {message}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseMessage> for Error {
    fn from(message: ParseMessage) -> Self {
        Error::Syntax(message)
    }
}

impl From<ResolveError> for Error {
    fn from(error: ResolveError) -> Self {
        Error::Resolve(error)
    }
}

impl From<BinaryError> for Error {
    fn from(error: BinaryError) -> Self {
        Error::Binary(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl Error {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            Error::Syntax(message) => message.to_diagnostic(),
            Error::Resolve(error) => error.to_diagnostic(),
            error => Diagnostic::error().with_message(error.to_string()),
        }
    }
}

/// Maps `!import` names to definition sources.
pub trait ImportLoader {
    fn load(&mut self, module: &str) -> Result<String, std::io::Error>;
}

/// Loads `<module>.dm` files relative to a base directory.
pub struct FsLoader {
    base: PathBuf,
}

impl FsLoader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl ImportLoader for FsLoader {
    fn load(&mut self, module: &str) -> Result<String, std::io::Error> {
        std::fs::read_to_string(self.base.join(format!("{module}.dm")))
    }
}

/// A loader for definitions that must not import anything.
struct NoImports;

impl ImportLoader for NoImports {
    fn load(&mut self, _module: &str) -> Result<String, std::io::Error> {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "imports are not available here",
        ))
    }
}

/// A resolved, reusable definition. One schema may parse any number of
/// inputs.
#[derive(Debug)]
pub struct Schema {
    types: Types,
    interner: StringInterner,
    root: TypeId,
}

impl Schema {
    pub fn parse(&self, data: &[u8], options: &Options) -> Result<Value, BinaryError> {
        let mut machine = Machine::new(&self.types, &self.interner, options);
        machine.parse(self.root, data)
    }
}

/// Compile a definition already loaded into the files database.
pub fn compile(
    files: &mut Files<String, String>,
    file_id: FileId,
    loader: &mut dyn ImportLoader,
) -> Result<Schema, Error> {
    let mut interner = StringInterner::new();
    let source = files.get(file_id).expect("missing file").source().clone();
    let mut module = surface::parse_module(&mut interner, file_id, &source)?;

    let mut stack = Vec::new();
    load_imports(&mut module.body, files, &mut interner, loader, &mut stack)?;

    let mut types = Types::new(&mut interner);
    let root = resolve::resolve_module(&mut types, &mut interner, &module)?;
    Ok(Schema {
        types,
        interner,
        root,
    })
}

/// Parse `data` against an inline definition.
pub fn parse(definition: &str, data: &[u8], options: Options) -> Result<Value, Error> {
    let mut files = Files::new();
    let file_id = files.add("<definition>".to_owned(), definition.to_owned());
    let schema = compile(&mut files, file_id, &mut NoImports)?;
    Ok(schema.parse(data, &options)?)
}

/// Parse `data` against a definition file; imports load from the same
/// directory.
pub fn parse_file(definition: &Path, data: &[u8], options: Options) -> Result<Value, Error> {
    let source = std::fs::read_to_string(definition)?;
    let mut files = Files::new();
    let file_id = files.add(definition.display().to_string(), source);
    let base = definition.parent().unwrap_or_else(|| Path::new("."));
    let mut loader = FsLoader::new(base);
    let schema = compile(&mut files, file_id, &mut loader)?;
    Ok(schema.parse(data, &options)?)
}

/// Load every `!import` in a body, recursively, splicing the parsed module
/// into the surface tree for the resolver to find.
fn load_imports(
    body: &mut Body,
    files: &mut Files<String, String>,
    interner: &mut StringInterner,
    loader: &mut dyn ImportLoader,
    stack: &mut Vec<String>,
) -> Result<(), Error> {
    for item in &mut body.items {
        match item {
            Item::Import(import) => {
                if stack.iter().any(|module| module == &import.module) {
                    return Err(Error::Import {
                        module: import.module.clone(),
                        message: format!(
                            "import cycle: {} -> {}",
                            stack.join(" -> "),
                            import.module
                        ),
                    });
                }
                let source =
                    loader
                        .load(&import.module)
                        .map_err(|error| Error::Import {
                            module: import.module.clone(),
                            message: error.to_string(),
                        })?;
                let file_id = files.add(format!("{}.dm", import.module), source.clone());
                let module = surface::parse_module(interner, file_id, &source)?;
                let mut inner = module.body;
                stack.push(import.module.clone());
                load_imports(&mut inner, files, interner, loader, stack)?;
                stack.pop();
                import.body = Some(inner);
            }
            Item::TypeDef(def) => {
                if let Some(ty) = &mut def.ty {
                    load_imports_type(ty, files, interner, loader, stack)?;
                }
            }
            Item::Field { ty, .. } | Item::AnonField { ty, .. } | Item::Yield { ty, .. } => {
                load_imports_type(ty, files, interner, loader, stack)?;
            }
            Item::If(if_item) => {
                load_imports(&mut if_item.then, files, interner, loader, stack)?;
                if let Some(els) = &mut if_item.els {
                    load_imports(els, files, interner, loader, stack)?;
                }
            }
            Item::Computed { .. }
            | Item::Return { .. }
            | Item::Save { .. }
            | Item::Debug { .. }
            | Item::Symfile { .. } => {}
        }
    }
    Ok(())
}

fn load_imports_type(
    ty: &mut Type,
    files: &mut Files<String, String>,
    interner: &mut StringInterner,
    loader: &mut dyn ImportLoader,
    stack: &mut Vec<String>,
) -> Result<(), Error> {
    match ty {
        Type::Struct(_, body) => load_imports(body, files, interner, loader, stack),
        Type::Array { elem, .. } => load_imports_type(elem, files, interner, loader, stack),
        Type::Match {
            scrutinee,
            branches,
            ..
        } => {
            load_imports_type(scrutinee, files, interner, loader, stack)?;
            for branch in branches {
                match &mut branch.arm {
                    BranchArm::Type(ty) => {
                        load_imports_type(ty, files, interner, loader, stack)?
                    }
                    BranchArm::TypeDef(def) => {
                        if let Some(ty) = &mut def.ty {
                            load_imports_type(ty, files, interner, loader, stack)?;
                        }
                    }
                    BranchArm::Computed(_, _) => {}
                }
            }
            Ok(())
        }
        Type::Pointer { target, .. } => {
            load_imports_type(target, files, interner, loader, stack)
        }
        Type::Pipe { left, right, .. } => {
            load_imports_type(left, files, interner, loader, stack)?;
            load_imports_type(right, files, interner, loader, stack)
        }
        Type::ForeignKey { inner, .. } => {
            load_imports_type(inner, files, interner, loader, stack)
        }
        Type::Call { args, .. } => {
            for arg in args {
                load_imports_type(arg, files, interner, loader, stack)?;
            }
            Ok(())
        }
        Type::Name(_, _) | Type::StringLit(_, _) => Ok(()),
    }
}

#[derive(Debug, Copy, Clone)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Error => 1,
        }
    }
}

/// The command-line front end: loads files, renders diagnostics to stderr,
/// and pretty-prints results to stdout.
pub struct Driver {
    files: Files<String, String>,
    codespan_config: codespan_reporting::term::Config,
    diagnostic_writer: Box<dyn WriteColor>,
    emit_width: usize,
    emit_writer: Box<dyn WriteColor>,
}

impl Driver {
    pub fn new() -> Driver {
        Driver {
            files: Files::new(),
            codespan_config: codespan_reporting::term::Config::default(),
            diagnostic_writer: Box::new(BufferedStandardStream::stderr(
                if atty::is(atty::Stream::Stderr) {
                    ColorChoice::Auto
                } else {
                    ColorChoice::Never
                },
            )),
            emit_width: 80,
            emit_writer: Box::new(BufferedStandardStream::stdout(
                if atty::is(atty::Stream::Stdout) {
                    ColorChoice::Auto
                } else {
                    ColorChoice::Never
                },
            )),
        }
    }

    /// Set the width to use when pretty-printing results.
    pub fn set_emit_width(&mut self, emit_width: usize) {
        self.emit_width = emit_width;
    }

    /// Set the writer to use when rendering diagnostics.
    pub fn set_diagnostic_writer(&mut self, stream: impl 'static + WriteColor) {
        self.diagnostic_writer = Box::new(stream);
    }

    /// Set the writer to use when emitting results.
    pub fn set_emit_writer(&mut self, stream: impl 'static + WriteColor) {
        self.emit_writer = Box::new(stream);
    }

    /// Parse a binary file against a definition file and pretty-print the
    /// result.
    pub fn run(
        &mut self,
        definition: &Path,
        binary: &Path,
        options: &Options,
    ) -> Status {
        let source = match std::fs::read_to_string(definition) {
            Ok(source) => source,
            Err(error) => {
                return self.emit_error(format!("{}: {error}", definition.display()));
            }
        };
        let data = match std::fs::read(binary) {
            Ok(data) => data,
            Err(error) => {
                return self.emit_error(format!("{}: {error}", binary.display()));
            }
        };
        let file_id = self.files.add(definition.display().to_string(), source);

        let base = definition.parent().unwrap_or_else(|| Path::new("."));
        let mut loader = FsLoader::new(base);
        let schema = match compile(&mut self.files, file_id, &mut loader) {
            Ok(schema) => schema,
            Err(error) => {
                self.emit_diagnostic(error.to_diagnostic());
                return Status::Error;
            }
        };

        match schema.parse(&data, options) {
            Ok(value) => {
                self.emit_value(&value);
                Status::Ok
            }
            Err(error) => {
                self.emit_diagnostic(Diagnostic::error().with_message(error.to_string()));
                Status::Error
            }
        }
    }

    pub fn emit_value(&mut self, value: &Value) {
        let pp = pretty::Context::new();
        let doc = pp.value(value);
        writeln!(self.emit_writer, "{}", doc.pretty(self.emit_width))
            .expect("failed to write result");
        self.emit_writer.flush().expect("failed to write result");
    }

    fn emit_error(&mut self, message: String) -> Status {
        self.emit_diagnostic(Diagnostic::error().with_message(message));
        Status::Error
    }

    fn emit_diagnostic(&mut self, diagnostic: Diagnostic<FileId>) {
        codespan_reporting::term::emit(
            &mut self.diagnostic_writer,
            &self.codespan_config,
            &self.files,
            &diagnostic,
        )
        .expect("failed to emit diagnostic");
        self.diagnostic_writer.flush().expect("failed to emit diagnostic");
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}
