//! Recursive-descent, single-pass parser-compiler.
//!
//! There is no AST: every grammar production emits bytecode directly as it
//! is recognised, the same discipline `CodeWriter`'s label back-patching
//! already assumes. A parsed expression leaves its value in the owning
//! function's `accu` by convention (`Instr::Push`/`Pop` are the only
//! instructions that touch the operand stack directly), so every
//! expression-compiling method below either returns `Pending::Value`
//! (already materialised into `accu`) or a deferred lvalue descriptor that
//! the caller must `materialize` before using it as an operand.

use raven_core::{
    Heap, HeapObjectKind, HeapRef, Instr, Op, RavenError, SymbolRef, SymbolTable, TypeRef, TypeTag,
    Value,
};
use raven_vm::blueprint::{
    blueprint_add_func, blueprint_inherit, chain_root_first, instance_var_index, BlueprintObj,
};
use raven_vm::fs::{fs_resolve, Filesystem, VirtPath};
use raven_vm::function::FunctionObj;
use raven_vm::object::blueprint_instantiate;
use raven_vm::vars::VarFlags;
use raven_vm::VmObject;

use crate::codewriter::{CodeWriter, Label};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// A parsed-but-not-yet-loaded value: either already sitting in `accu`, or
/// a descriptor telling `materialize`/`maybe_assignment` how to load or
/// store it. Index targets carry no payload because the base and index are
/// already sitting on the operand stack/in `accu` by the time one exists.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Value,
    Local(u32),
    Member(u32),
    Index,
}

/// Grabs whichever `CodeWriter` is presently open: a method body if one is
/// being compiled, else the blueprint's `_init`. Written as a macro (not a
/// method taking `&mut self`) so call sites can still borrow `self.heap`/
/// `self.symbols` in the same statement -- a real method here would hide
/// the field-disjointness the borrow checker needs to allow that.
macro_rules! active_writer {
    ($self:expr) => {
        $self.func.as_mut().unwrap_or(&mut $self.init)
    };
}

pub struct Parser<'a> {
    heap: &'a mut Heap<VmObject>,
    symbols: &'a mut SymbolTable,
    fs: &'a mut dyn Filesystem,
    tokens: Vec<Token>,
    pos: usize,
    source: String,
    path: VirtPath,
    blueprint: HeapRef,
    init: CodeWriter,
    func: Option<CodeWriter>,
    cur_return_type: TypeRef,
    break_labels: Vec<Label>,
    continue_labels: Vec<Label>,
    catch_stack: Vec<Label>,
}

/// Compile `source` (already read from `path`) onto `blueprint`, which the
/// caller has allocated but not yet populated. Top-level entry point used
/// by [`compile_blueprint`] and by `#include` splicing's recursive reads.
pub fn compile(
    heap: &mut Heap<VmObject>,
    symbols: &mut SymbolTable,
    fs: &mut dyn Filesystem,
    path: VirtPath,
    source: &str,
    blueprint: HeapRef,
) -> Result<(), RavenError> {
    let tokens = Lexer::new(path.as_string(), source).tokenize()?;
    let mut parser = Parser {
        heap,
        symbols,
        fs,
        tokens,
        pos: 0,
        source: source.to_string(),
        path,
        blueprint,
        init: CodeWriter::new("_init"),
        func: None,
        cur_return_type: TypeRef::Void,
        break_labels: Vec::new(),
        continue_labels: Vec::new(),
        catch_stack: Vec::new(),
    };
    parser.run()
}

/// Read `path` from `fs`, allocate a fresh blueprint there, and compile it.
/// This is what a [`Filesystem`] implementation's `find_blueprint` calls
/// on a cache miss.
pub fn compile_blueprint(
    heap: &mut Heap<VmObject>,
    symbols: &mut SymbolTable,
    fs: &mut dyn Filesystem,
    path: &VirtPath,
) -> Result<HeapRef, RavenError> {
    let mut source = String::new();
    if !fs.read(path, &mut source) {
        return Err(RavenError::Resolution(format!("no source at '{}'", path.as_string())));
    }
    let bp = heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new(path.as_string()))));
    compile(heap, symbols, fs, path.clone(), &source, bp)?;
    Ok(bp)
}

fn is_type_keyword(name: &str) -> bool {
    matches!(
        name,
        "void" | "mixed" | "int" | "char" | "string" | "array" | "mapping" | "function" | "object"
    )
}

fn type_tag_of(t: &TypeRef) -> TypeTag {
    match t {
        TypeRef::Void => TypeTag::Void,
        TypeRef::Mixed => TypeTag::Mixed,
        TypeRef::Int => TypeTag::Int,
        TypeRef::Char => TypeTag::Char,
        TypeRef::String => TypeTag::String,
        TypeRef::Array => TypeTag::Array,
        TypeRef::Mapping => TypeTag::Mapping,
        TypeRef::Function => TypeTag::Function,
        TypeRef::Object(_) => TypeTag::Object,
    }
}

fn compound_op(kind: &TokenKind) -> Option<Op> {
    match kind {
        TokenKind::PlusEq => Some(Op::Add),
        TokenKind::MinusEq => Some(Op::Sub),
        TokenKind::StarEq => Some(Op::Mul),
        TokenKind::SlashEq => Some(Op::Div),
        TokenKind::PercentEq => Some(Op::Mod),
        _ => None,
    }
}

impl<'a> Parser<'a> {
    fn run(&mut self) -> Result<(), RavenError> {
        self.compile_inherit_prefix()?;
        while !self.at_eof() {
            self.statement()?;
        }
        self.finish_init()
    }

    // ---- token-stream plumbing ------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn at_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn check(&mut self, kind: &TokenKind) -> bool {
        if &self.current().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), RavenError> {
        if self.check(kind) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected {what}")))
        }
    }

    fn check_ident(&mut self, name: &str) -> bool {
        if matches!(&self.current().kind, TokenKind::Ident(s) if s == name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, name: &str) -> Result<(), RavenError> {
        if self.check_ident(name) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected '{name}'")))
        }
    }

    fn peek_ident_str(&self) -> Option<String> {
        if let TokenKind::Ident(s) = &self.current().kind {
            Some(s.clone())
        } else {
            None
        }
    }

    fn peek_ahead_is_ident(&self, ahead: usize) -> bool {
        matches!(self.tokens.get(self.pos + ahead).map(|t| &t.kind), Some(TokenKind::Ident(_)))
    }

    fn ident(&mut self) -> Result<String, RavenError> {
        if let TokenKind::Ident(s) = self.current().kind.clone() {
            self.advance();
            Ok(s)
        } else {
            Err(self.err_here("expected identifier"))
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<String, RavenError> {
        match self.current().kind.clone() {
            TokenKind::Str(s) | TokenKind::RawStr(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.err_here(format!("expected a string literal for {what}"))),
        }
    }

    fn err_here(&self, message: impl Into<String>) -> RavenError {
        let tok = self.current();
        let line_text = self.source.lines().nth(tok.line.saturating_sub(1)).unwrap_or("");
        let caret = format!("{}^", " ".repeat(tok.column.saturating_sub(1)));
        RavenError::Syntax {
            path: self.path.as_string(),
            line: tok.line,
            column: tok.column,
            message: message.into(),
            excerpt: format!("{line_text}\n{caret}"),
        }
    }

    // ---- writer-delegating helpers --------------------------------------------

    fn add_const(&mut self, v: Value) -> u32 {
        active_writer!(self).add_const(v)
    }

    fn intern_string(&mut self, s: &str) -> u32 {
        active_writer!(self).intern_string(self.heap, s)
    }

    fn intern_symbol(&mut self, name: &str) -> u32 {
        active_writer!(self).intern_symbol(self.heap, self.symbols, name)
    }

    fn intern_message(&mut self, name: &str) -> u32 {
        active_writer!(self).intern_message(self.heap, self.symbols, name)
    }

    fn emit(&mut self, instr: Instr) -> usize {
        active_writer!(self).emit(instr)
    }

    fn open_label(&mut self) -> Label {
        active_writer!(self).open_label()
    }

    fn place_label(&mut self, l: Label) {
        active_writer!(self).place_label(l)
    }

    fn emit_jump(&mut self, template: Instr, l: Label) -> usize {
        active_writer!(self).emit_jump(template, l)
    }

    fn materialize(&mut self, p: Pending) {
        match p {
            Pending::Value => {}
            Pending::Local(i) => {
                self.emit(Instr::LoadLocal(i));
            }
            Pending::Member(i) => {
                self.emit(Instr::LoadMember(i));
            }
            Pending::Index => {
                self.emit(Instr::Op(Op::Index));
            }
        }
    }

    fn resolve_member(&self, sym: SymbolRef) -> Option<(u32, TypeTag)> {
        instance_var_index(self.heap, self.blueprint, sym).map(|(i, t)| (i as u32, t))
    }

    // ---- file-level grammar ----------------------------------------------------

    fn compile_inherit_prefix(&mut self) -> Result<(), RavenError> {
        if self.check_ident("inherit") {
            let path_str = self.expect_string("inherit path")?;
            self.expect(&TokenKind::Semi, "';' after inherited path")?;
            let target = fs_resolve(&self.path.parent(), &path_str);
            let parent_bp = self
                .fs
                .find_blueprint(self.heap, self.symbols, &target, true)
                .ok_or_else(|| self.err_here(format!("cannot resolve inherited blueprint '{path_str}'")))?;
            if !blueprint_inherit(self.heap, self.blueprint, parent_bp) {
                return Err(self.err_here("a blueprint may only inherit once"));
            }
        }
        Ok(())
    }

    fn finish_init(&mut self) -> Result<(), RavenError> {
        let w = std::mem::replace(&mut self.init, CodeWriter::new("_init"));
        let def = w.finish();
        let name_sym = self.symbols.intern(self.heap, "_init");
        let func_ref = self.heap.alloc(HeapObjectKind::Ext(VmObject::Function(FunctionObj::new(def, name_sym))));
        blueprint_add_func(self.heap, self.blueprint, func_ref);
        Ok(())
    }

    fn statement(&mut self) -> Result<(), RavenError> {
        if self.check(&TokenKind::Hash) {
            self.expect_ident("include")?;
            let rel = self.expect_string("include path")?;
            self.expect(&TokenKind::Semi, "';' after #include path")?;
            return self.splice_include(&rel);
        }
        if self.check_ident("inherit") {
            return Err(self.err_here("'inherit' must be the first statement in the file"));
        }
        if self.check_ident("class") {
            return self.class_stmt();
        }
        let (is_private, is_protected) = self.modifiers();
        let ty = self.parse_type()?;
        let name = self.ident()?;
        if self.check(&TokenKind::LParen) {
            self.func_decl_rest(is_private, is_protected, ty, name)
        } else {
            self.member_decl_rest(name, ty)
        }
    }

    fn modifiers(&mut self) -> (bool, bool) {
        let mut is_private = false;
        let mut is_protected = false;
        loop {
            match self.peek_ident_str().as_deref() {
                Some("private") => {
                    self.advance();
                    is_private = true;
                }
                Some("protected") => {
                    self.advance();
                    is_protected = true;
                }
                Some("public") | Some("nosave") | Some("deprecated") => {
                    self.advance();
                }
                _ => break,
            }
        }
        (is_private, is_protected)
    }

    fn parse_type(&mut self) -> Result<TypeRef, RavenError> {
        let name = self.ident()?;
        Ok(match name.as_str() {
            "void" => TypeRef::Void,
            "mixed" => TypeRef::Mixed,
            "int" => TypeRef::Int,
            "char" => TypeRef::Char,
            "string" => TypeRef::String,
            "array" => TypeRef::Array,
            "mapping" => TypeRef::Mapping,
            "function" => TypeRef::Function,
            "object" => TypeRef::Object(None),
            other => TypeRef::Object(Some(other.to_string())),
        })
    }

    fn splice_include(&mut self, rel: &str) -> Result<(), RavenError> {
        let target = fs_resolve(&self.path.parent(), rel);
        let mut content = String::new();
        if !self.fs.read(&target, &mut content) {
            return Err(self.err_here(format!("cannot read included file '{rel}'")));
        }
        let mut included = Lexer::new(target.as_string(), &content).tokenize()?;
        included.pop(); // drop its own Eof; the outer stream keeps the one Eof
        self.tokens.splice(self.pos..self.pos, included);
        Ok(())
    }

    fn class_stmt(&mut self) -> Result<(), RavenError> {
        let name = self.ident()?;
        let obj_ref = if self.check(&TokenKind::LBrace) {
            let nested_path_str = format!("{}${}", self.path.as_string(), name);
            let nested_path = VirtPath::parse(&nested_path_str);
            let nested_bp =
                self.heap.alloc(HeapObjectKind::Ext(VmObject::Blueprint(BlueprintObj::new(nested_path_str))));

            let saved_bp = self.blueprint;
            let saved_path = std::mem::replace(&mut self.path, nested_path);
            let saved_init = std::mem::replace(&mut self.init, CodeWriter::new("_init"));
            debug_assert!(self.func.is_none(), "class body opened while a method body is active");
            self.blueprint = nested_bp;

            self.compile_inherit_prefix()?;
            while !self.check(&TokenKind::RBrace) {
                self.statement()?;
            }
            self.finish_init()?;

            self.blueprint = saved_bp;
            self.path = saved_path;
            self.init = saved_init;
            self.expect(&TokenKind::Semi, "';' after inline class body")?;
            blueprint_instantiate(self.heap, nested_bp)
        } else {
            let path_str = self.expect_string("class source path")?;
            self.expect(&TokenKind::Semi, "';' after class path")?;
            let target = fs_resolve(&self.path.parent(), &path_str);
            let bp_ref = self
                .fs
                .find_blueprint(self.heap, self.symbols, &target, true)
                .ok_or_else(|| self.err_here(format!("cannot resolve class blueprint '{path_str}'")))?;
            blueprint_instantiate(self.heap, bp_ref)
        };

        let sym = self.symbols.intern(self.heap, &name);
        let flat_index = self.declare_member(TypeTag::Object, sym);
        let const_idx = self.init.add_const(Value::Ptr(obj_ref));
        self.init.emit(Instr::LoadConst(const_idx));
        self.init.emit(Instr::StoreMember(flat_index));
        Ok(())
    }

    /// Add an instance variable to the current blueprint, returning its
    /// chain-wide flat index (ancestors' fill plus this blueprint's own
    /// slot), the operand every `StoreMember`/`LoadMember` needs.
    fn declare_member(&mut self, tag: TypeTag, sym: SymbolRef) -> u32 {
        let ancestors_fill: usize = {
            let chain = chain_root_first(self.heap, self.blueprint);
            chain[..chain.len() - 1]
                .iter()
                .map(|&r| match self.heap.get(r) {
                    HeapObjectKind::Ext(VmObject::Blueprint(b)) => b.vars.fill(),
                    _ => 0,
                })
                .sum()
        };
        let local_idx = match self.heap.get_mut(self.blueprint) {
            HeapObjectKind::Ext(VmObject::Blueprint(bp)) => bp.add_var(tag, sym, VarFlags::empty()),
            _ => unreachable!("self.blueprint always points at a Blueprint"),
        };
        (ancestors_fill + local_idx) as u32
    }

    fn member_decl_rest(&mut self, name: String, ty: TypeRef) -> Result<(), RavenError> {
        let tag = type_tag_of(&ty);
        let sym = self.symbols.intern(self.heap, &name);
        let flat_index = self.declare_member(tag, sym);
        if self.check(&TokenKind::Assign) {
            self.expr()?;
            self.init.emit(Instr::StoreMember(flat_index));
        }
        self.expect(&TokenKind::Semi, "';' after variable declaration")?;
        Ok(())
    }

    fn func_decl_rest(
        &mut self,
        is_private: bool,
        is_protected: bool,
        return_type: TypeRef,
        name: String,
    ) -> Result<(), RavenError> {
        let mut w = CodeWriter::new(name.clone());
        w.set_visibility(is_private, is_protected);
        w.set_return_type(return_type.clone());
        self.func = Some(w);
        self.cur_return_type = return_type;

        if !self.check(&TokenKind::RParen) {
            loop {
                if self.check(&TokenKind::Ellipsis) {
                    active_writer!(self).set_varargs(true);
                    break;
                }
                let t = self.parse_type()?;
                let pname = self.ident()?;
                let sym = self.symbols.intern(self.heap, &pname);
                let tag = type_tag_of(&t);
                active_writer!(self).declare_param(tag, t, sym);
                if self.check(&TokenKind::Comma) {
                    continue;
                }
                break;
            }
            self.expect(&TokenKind::RParen, "')' to close parameter list")?;
        }

        self.expect(&TokenKind::LBrace, "'{' to open function body")?;
        while !self.check(&TokenKind::RBrace) {
            self.instruction()?;
        }

        let w = self.func.take().expect("function writer active for the body we just closed");
        let def = w.finish();
        let name_sym = self.symbols.intern(self.heap, &name);
        let func_ref = self.heap.alloc(HeapObjectKind::Ext(VmObject::Function(FunctionObj::new(def, name_sym))));
        blueprint_add_func(self.heap, self.blueprint, func_ref);
        self.cur_return_type = TypeRef::Void;
        Ok(())
    }

    // ---- statements (inside a function body) -----------------------------------

    fn instruction(&mut self) -> Result<(), RavenError> {
        if self.check(&TokenKind::Semi) {
            return Ok(());
        }
        if self.check(&TokenKind::LBrace) {
            active_writer!(self).push_scope();
            while !self.check(&TokenKind::RBrace) {
                self.instruction()?;
            }
            active_writer!(self).pop_scope();
            return Ok(());
        }
        if let Some(name) = self.peek_ident_str() {
            match name.as_str() {
                "let" => return self.vardecl(),
                "if" => return self.if_stmt(),
                "while" => return self.while_stmt(),
                "do" => return self.do_stmt(),
                "for" => return self.for_stmt(),
                "foreach" => return self.foreach_stmt(),
                "switch" => return self.switch_stmt(),
                "try" => return self.try_stmt(),
                "return" => return self.return_stmt(),
                "break" => {
                    self.advance();
                    self.expect(&TokenKind::Semi, "';' after 'break'")?;
                    let l = *self
                        .break_labels
                        .last()
                        .ok_or_else(|| self.err_here("'break' outside a loop or switch"))?;
                    self.emit_jump(Instr::Jump(0), l);
                    return Ok(());
                }
                "continue" => {
                    self.advance();
                    self.expect(&TokenKind::Semi, "';' after 'continue'")?;
                    let l = *self
                        .continue_labels
                        .last()
                        .ok_or_else(|| self.err_here("'continue' outside a loop"))?;
                    self.emit_jump(Instr::Jump(0), l);
                    return Ok(());
                }
                _ if is_type_keyword(&name) && self.peek_ahead_is_ident(1) => return self.vardecl(),
                _ => {}
            }
        }
        self.expr()?;
        self.expect(&TokenKind::Semi, "';' after expression statement")?;
        Ok(())
    }

    fn vardecl(&mut self) -> Result<(), RavenError> {
        if self.check_ident("let") {
            let name = self.ident()?;
            let tag = if self.check(&TokenKind::Colon) {
                type_tag_of(&self.parse_type()?)
            } else {
                TypeTag::Mixed
            };
            self.finish_vardecl(name, tag)
        } else {
            let t = self.parse_type()?;
            let name = self.ident()?;
            self.finish_vardecl(name, type_tag_of(&t))
        }
    }

    fn finish_vardecl(&mut self, name: String, tag: TypeTag) -> Result<(), RavenError> {
        let sym = self.symbols.intern(self.heap, &name);
        let idx = active_writer!(self).declare_local(tag, sym, VarFlags::empty());
        if self.check(&TokenKind::Assign) {
            self.expr()?;
            self.emit(Instr::StoreLocal(idx));
        }
        self.expect(&TokenKind::Semi, "';' after variable declaration")?;
        Ok(())
    }

    fn if_stmt(&mut self) -> Result<(), RavenError> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' after 'if'")?;
        self.expr()?;
        self.expect(&TokenKind::RParen, "')' after condition")?;
        let lmid = self.open_label();
        self.emit_jump(Instr::JumpIfNot(0), lmid);
        self.instruction()?;
        if self.check_ident("else") {
            let lend = self.open_label();
            self.emit_jump(Instr::Jump(0), lend);
            self.place_label(lmid);
            self.instruction()?;
            self.place_label(lend);
        } else {
            self.place_label(lmid);
        }
        Ok(())
    }

    fn while_stmt(&mut self) -> Result<(), RavenError> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' after 'while'")?;
        let lhead = self.open_label();
        self.place_label(lhead);
        self.expr()?;
        self.expect(&TokenKind::RParen, "')' after condition")?;
        let lend = self.open_label();
        self.emit_jump(Instr::JumpIfNot(0), lend);
        self.continue_labels.push(lhead);
        self.break_labels.push(lend);
        self.instruction()?;
        self.continue_labels.pop();
        self.break_labels.pop();
        self.emit_jump(Instr::Jump(0), lhead);
        self.place_label(lend);
        Ok(())
    }

    fn do_stmt(&mut self) -> Result<(), RavenError> {
        self.advance();
        let lhead = self.open_label();
        self.place_label(lhead);
        let lend = self.open_label();
        self.continue_labels.push(lhead);
        self.break_labels.push(lend);
        self.instruction()?;
        self.continue_labels.pop();
        self.break_labels.pop();
        self.expect_ident("while")?;
        self.expect(&TokenKind::LParen, "'(' after 'while'")?;
        self.expr()?;
        self.expect(&TokenKind::RParen, "')' after condition")?;
        self.expect(&TokenKind::Semi, "';' after do-while")?;
        self.emit_jump(Instr::JumpIf(0), lhead);
        self.place_label(lend);
        Ok(())
    }

    fn for_stmt(&mut self) -> Result<(), RavenError> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' after 'for'")?;
        active_writer!(self).push_scope();
        self.for_init()?;

        let lhead = self.open_label();
        self.place_label(lhead);
        self.expr()?;
        self.expect(&TokenKind::Semi, "';' after loop condition")?;
        let lend = self.open_label();
        self.emit_jump(Instr::JumpIfNot(0), lend);

        let lbody = self.open_label();
        self.emit_jump(Instr::Jump(0), lbody);
        let lcont = self.open_label();
        self.place_label(lcont);
        self.expr()?;
        self.expect(&TokenKind::RParen, "')' after loop step")?;
        self.emit_jump(Instr::Jump(0), lhead);
        self.place_label(lbody);

        self.continue_labels.push(lcont);
        self.break_labels.push(lend);
        self.instruction()?;
        self.continue_labels.pop();
        self.break_labels.pop();
        self.emit_jump(Instr::Jump(0), lcont);
        self.place_label(lend);
        active_writer!(self).pop_scope();
        Ok(())
    }

    fn for_init(&mut self) -> Result<(), RavenError> {
        if self.check(&TokenKind::Semi) {
            return Ok(());
        }
        if self.check_ident("let") {
            let name = self.ident()?;
            let tag = if self.check(&TokenKind::Colon) {
                type_tag_of(&self.parse_type()?)
            } else {
                TypeTag::Mixed
            };
            return self.for_init_finish(name, tag);
        }
        if let Some(name) = self.peek_ident_str() {
            if is_type_keyword(&name) && self.peek_ahead_is_ident(1) {
                let t = self.parse_type()?;
                let ident = self.ident()?;
                return self.for_init_finish(ident, type_tag_of(&t));
            }
        }
        self.expr()?;
        self.expect(&TokenKind::Semi, "';' after for-loop initializer")?;
        Ok(())
    }

    fn for_init_finish(&mut self, name: String, tag: TypeTag) -> Result<(), RavenError> {
        let sym = self.symbols.intern(self.heap, &name);
        let idx = active_writer!(self).declare_local(tag, sym, VarFlags::empty());
        if self.check(&TokenKind::Assign) {
            self.expr()?;
            self.emit(Instr::StoreLocal(idx));
        }
        self.expect(&TokenKind::Semi, "';' after for-loop initializer")?;
        Ok(())
    }

    fn foreach_stmt(&mut self) -> Result<(), RavenError> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' after 'foreach'")?;
        let t = self.parse_type()?;
        let vname = self.ident()?;
        self.expect(&TokenKind::Colon, "':' in foreach header")?;

        active_writer!(self).push_scope();
        let list_sym = self.symbols.gensym(self.heap);
        let index_sym = self.symbols.gensym(self.heap);
        let v_sym = self.symbols.intern(self.heap, &vname);
        let list_idx = active_writer!(self).declare_local(TypeTag::Array, list_sym, VarFlags::empty());
        let index_idx = active_writer!(self).declare_local(TypeTag::Int, index_sym, VarFlags::empty());
        let v_idx = active_writer!(self).declare_local(type_tag_of(&t), v_sym, VarFlags::empty());

        self.expr()?;
        self.expect(&TokenKind::RParen, "')' after foreach expression")?;
        self.emit(Instr::StoreLocal(list_idx));
        let c0 = self.add_const(Value::Int(0));
        self.emit(Instr::LoadConst(c0));
        self.emit(Instr::StoreLocal(index_idx));

        let lcont = self.open_label();
        self.place_label(lcont);
        self.emit(Instr::LoadLocal(index_idx));
        self.emit(Instr::Push);
        self.emit(Instr::LoadLocal(list_idx));
        self.emit(Instr::Op(Op::Sizeof));
        self.emit(Instr::Op(Op::Less));
        let lend = self.open_label();
        self.emit_jump(Instr::JumpIfNot(0), lend);

        self.emit(Instr::LoadLocal(list_idx));
        self.emit(Instr::Push);
        self.emit(Instr::LoadLocal(index_idx));
        self.emit(Instr::Push);
        self.emit(Instr::Push);
        let c1 = self.add_const(Value::Int(1));
        self.emit(Instr::LoadConst(c1));
        self.emit(Instr::Op(Op::Add));
        self.emit(Instr::StoreLocal(index_idx));
        self.emit(Instr::Pop);
        self.emit(Instr::Op(Op::Index));
        self.emit(Instr::StoreLocal(v_idx));

        self.continue_labels.push(lcont);
        self.break_labels.push(lend);
        self.instruction()?;
        self.continue_labels.pop();
        self.break_labels.pop();
        self.emit_jump(Instr::Jump(0), lcont);
        self.place_label(lend);
        active_writer!(self).pop_scope();
        Ok(())
    }

    /// `switch (x) { case E: B ... default: B }`. `x` is pushed once and
    /// carried across every `case`/`default` arm; each arm reloads it to
    /// compare, and the saved copy is popped exactly once on every path --
    /// eagerly on a taken `case`, once at the shared fall-through/`default`
    /// tail otherwise.
    fn switch_stmt(&mut self) -> Result<(), RavenError> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' after 'switch'")?;
        self.expr()?;
        self.expect(&TokenKind::RParen, "')' after switch expression")?;
        self.expect(&TokenKind::LBrace, "'{' to open switch body")?;
        self.emit(Instr::Push);

        let mut cur_cont = self.open_label();
        self.emit_jump(Instr::Jump(0), cur_cont);
        let lend = self.open_label();
        self.break_labels.push(lend);

        while !self.check(&TokenKind::RBrace) {
            if self.check_ident("case") {
                let skip = self.open_label();
                self.emit_jump(Instr::Jump(0), skip);
                self.place_label(cur_cont);
                let next_cont = self.open_label();
                self.emit(Instr::Pop);
                self.emit(Instr::Push);
                self.emit(Instr::Push);
                self.expr()?;
                self.expect(&TokenKind::Colon, "':' after case expression")?;
                self.emit(Instr::Op(Op::Eq));
                self.emit_jump(Instr::JumpIfNot(0), next_cont);
                self.emit(Instr::Pop);
                self.place_label(skip);
                cur_cont = next_cont;
            } else if self.check_ident("default") {
                self.expect(&TokenKind::Colon, "':' after 'default'")?;
                let skip = self.open_label();
                self.emit_jump(Instr::Jump(0), skip);
                self.place_label(cur_cont);
                self.emit(Instr::Pop);
                self.place_label(skip);
                cur_cont = self.open_label();
            } else {
                self.instruction()?;
            }
        }
        self.place_label(cur_cont);
        self.emit(Instr::Pop);
        self.break_labels.pop();
        self.place_label(lend);
        Ok(())
    }

    fn return_stmt(&mut self) -> Result<(), RavenError> {
        self.advance();
        if self.check(&TokenKind::Semi) {
            let idx = self.add_const(Value::Nil);
            self.emit(Instr::LoadConst(idx));
        } else {
            self.expr()?;
            self.expect(&TokenKind::Semi, "';' after return expression")?;
            if !matches!(self.cur_return_type, TypeRef::Void | TypeRef::Mixed) {
                let t = self.cur_return_type.clone();
                self.emit(Instr::Typecast(t));
            }
        }
        self.emit(Instr::Return);
        Ok(())
    }

    /// `try B catch (T v) B'`. Reuses `UpdateCatch`'s existing patchable-jump
    /// support for the "restore the enclosing handler" step: the outer
    /// handler's label may not be placed yet (it lies lexically after this
    /// whole construct), same as any other forward jump.
    fn try_stmt(&mut self) -> Result<(), RavenError> {
        self.advance();
        let outer = self.catch_stack.last().copied();
        let handler = self.open_label();
        self.emit_jump(Instr::UpdateCatch(0), handler);
        self.catch_stack.push(handler);
        self.instruction()?;
        self.catch_stack.pop();
        self.restore_catch(outer);

        let past = self.open_label();
        self.emit_jump(Instr::Jump(0), past);
        self.place_label(handler);
        self.restore_catch(outer);

        self.expect_ident("catch")?;
        self.expect(&TokenKind::LParen, "'(' after 'catch'")?;
        let t = self.parse_type()?;
        let vname = self.ident()?;
        self.expect(&TokenKind::RParen, "')' after catch variable")?;

        active_writer!(self).push_scope();
        let sym = self.symbols.intern(self.heap, &vname);
        let tag = type_tag_of(&t);
        let idx = active_writer!(self).declare_local(tag, sym, VarFlags::empty());
        if !matches!(t, TypeRef::Void | TypeRef::Mixed) {
            self.emit(Instr::Typecheck(t));
        }
        self.emit(Instr::StoreLocal(idx));
        self.instruction()?;
        active_writer!(self).pop_scope();

        self.place_label(past);
        Ok(())
    }

    fn restore_catch(&mut self, outer: Option<Label>) {
        match outer {
            Some(l) => {
                self.emit_jump(Instr::UpdateCatch(0), l);
            }
            None => {
                self.emit(Instr::UpdateCatch(0));
            }
        }
    }

    // ---- expressions -------------------------------------------------------

    /// Compile a full expression, always leaving its value materialised in
    /// `accu`. Every call site outside the precedence chain itself (return,
    /// conditions, initializers, argument lists, array elements, case
    /// labels) goes through this, not `ternary_pending`.
    fn expr(&mut self) -> Result<(), RavenError> {
        let p = self.ternary_pending()?;
        self.materialize(p);
        Ok(())
    }

    fn ternary_pending(&mut self) -> Result<Pending, RavenError> {
        let cond = self.or_pending()?;
        if self.check(&TokenKind::Question) {
            self.materialize(cond);
            let lelse = self.open_label();
            self.emit_jump(Instr::JumpIfNot(0), lelse);
            self.expr()?;
            let lend = self.open_label();
            self.emit_jump(Instr::Jump(0), lend);
            self.expect(&TokenKind::Colon, "':' in ternary expression")?;
            self.place_label(lelse);
            self.expr()?;
            self.place_label(lend);
            Ok(Pending::Value)
        } else if self.check(&TokenKind::QuestionQuestion) {
            self.materialize(cond);
            let lkeep = self.open_label();
            self.emit_jump(Instr::JumpIf(0), lkeep);
            self.expr()?;
            self.place_label(lkeep);
            Ok(Pending::Value)
        } else {
            Ok(cond)
        }
    }

    fn or_pending(&mut self) -> Result<Pending, RavenError> {
        let mut left = self.and_pending()?;
        while self.check(&TokenKind::PipePipe) {
            self.materialize(left);
            let lend = self.open_label();
            self.emit_jump(Instr::JumpIf(0), lend);
            let right = self.and_pending()?;
            self.materialize(right);
            self.place_label(lend);
            left = Pending::Value;
        }
        Ok(left)
    }

    fn and_pending(&mut self) -> Result<Pending, RavenError> {
        let mut left = self.bitor_pending()?;
        while self.check(&TokenKind::AmpAmp) {
            self.materialize(left);
            let lend = self.open_label();
            self.emit_jump(Instr::JumpIfNot(0), lend);
            let right = self.bitor_pending()?;
            self.materialize(right);
            self.place_label(lend);
            left = Pending::Value;
        }
        Ok(left)
    }

    fn bitor_pending(&mut self) -> Result<Pending, RavenError> {
        let mut left = self.bitand_pending()?;
        while self.check(&TokenKind::Pipe) {
            self.materialize(left);
            self.emit(Instr::Push);
            let right = self.bitand_pending()?;
            self.materialize(right);
            self.emit(Instr::Op(Op::BitOr));
            left = Pending::Value;
        }
        Ok(left)
    }

    fn bitand_pending(&mut self) -> Result<Pending, RavenError> {
        let mut left = self.eq_pending()?;
        while self.check(&TokenKind::Amp) {
            self.materialize(left);
            self.emit(Instr::Push);
            let right = self.eq_pending()?;
            self.materialize(right);
            self.emit(Instr::Op(Op::BitAnd));
            left = Pending::Value;
        }
        Ok(left)
    }

    fn eq_pending(&mut self) -> Result<Pending, RavenError> {
        let mut left = self.rel_pending()?;
        loop {
            let op = if self.check(&TokenKind::EqEq) {
                Op::Eq
            } else if self.check(&TokenKind::BangEq) {
                Op::Ineq
            } else {
                break;
            };
            self.materialize(left);
            self.emit(Instr::Push);
            let right = self.rel_pending()?;
            self.materialize(right);
            self.emit(Instr::Op(op));
            left = Pending::Value;
        }
        Ok(left)
    }

    fn rel_pending(&mut self) -> Result<Pending, RavenError> {
        let mut left = self.shift_pending()?;
        loop {
            let op = if self.check(&TokenKind::Lt) {
                Op::Less
            } else if self.check(&TokenKind::LtEq) {
                Op::LessEq
            } else if self.check(&TokenKind::Gt) {
                Op::Greater
            } else if self.check(&TokenKind::GtEq) {
                Op::GreaterEq
            } else {
                break;
            };
            self.materialize(left);
            self.emit(Instr::Push);
            let right = self.shift_pending()?;
            self.materialize(right);
            self.emit(Instr::Op(op));
            left = Pending::Value;
        }
        Ok(left)
    }

    fn shift_pending(&mut self) -> Result<Pending, RavenError> {
        let mut left = self.add_pending()?;
        loop {
            let op = if self.check(&TokenKind::Shl) {
                Op::Shl
            } else if self.check(&TokenKind::Shr) {
                Op::Shr
            } else {
                break;
            };
            self.materialize(left);
            self.emit(Instr::Push);
            let right = self.add_pending()?;
            self.materialize(right);
            self.emit(Instr::Op(op));
            left = Pending::Value;
        }
        Ok(left)
    }

    fn add_pending(&mut self) -> Result<Pending, RavenError> {
        let mut left = self.mul_pending()?;
        loop {
            let op = if self.check(&TokenKind::Plus) {
                Op::Add
            } else if self.check(&TokenKind::Minus) {
                Op::Sub
            } else {
                break;
            };
            self.materialize(left);
            self.emit(Instr::Push);
            let right = self.mul_pending()?;
            self.materialize(right);
            self.emit(Instr::Op(op));
            left = Pending::Value;
        }
        Ok(left)
    }

    fn mul_pending(&mut self) -> Result<Pending, RavenError> {
        let mut left = self.unary_pending()?;
        loop {
            let op = if self.check(&TokenKind::Star) {
                Op::Mul
            } else if self.check(&TokenKind::Slash) {
                Op::Div
            } else if self.check(&TokenKind::Percent) {
                Op::Mod
            } else {
                break;
            };
            self.materialize(left);
            self.emit(Instr::Push);
            let right = self.unary_pending()?;
            self.materialize(right);
            self.emit(Instr::Op(op));
            left = Pending::Value;
        }
        Ok(left)
    }

    fn unary_pending(&mut self) -> Result<Pending, RavenError> {
        match self.current().kind.clone() {
            TokenKind::Minus => {
                self.advance();
                let v = self.unary_pending()?;
                self.materialize(v);
                self.emit(Instr::Op(Op::Negate));
                Ok(Pending::Value)
            }
            TokenKind::Plus => {
                self.advance();
                self.unary_pending()
            }
            TokenKind::Bang => {
                self.advance();
                let v = self.unary_pending()?;
                self.materialize(v);
                self.emit(Instr::Op(Op::Not));
                Ok(Pending::Value)
            }
            TokenKind::Star => {
                self.advance();
                let v = self.unary_pending()?;
                self.materialize(v);
                self.emit(Instr::Op(Op::Deref));
                Ok(Pending::Value)
            }
            TokenKind::Ident(ref name) if name == "sizeof" => {
                self.advance();
                let v = self.unary_pending()?;
                self.materialize(v);
                self.emit(Instr::Op(Op::Sizeof));
                Ok(Pending::Value)
            }
            TokenKind::Ident(ref name) if name == "new" => {
                self.advance();
                let v = self.unary_pending()?;
                self.materialize(v);
                self.emit(Instr::Op(Op::New));
                Ok(Pending::Value)
            }
            _ => {
                let target = self.postfix()?;
                self.maybe_assignment(target)
            }
        }
    }

    fn maybe_assignment(&mut self, target: Pending) -> Result<Pending, RavenError> {
        match self.current().kind.clone() {
            TokenKind::Assign => {
                self.advance();
                match target {
                    Pending::Local(i) => {
                        self.expr()?;
                        self.emit(Instr::StoreLocal(i));
                        Ok(Pending::Value)
                    }
                    Pending::Member(i) => {
                        self.expr()?;
                        self.emit(Instr::StoreMember(i));
                        Ok(Pending::Value)
                    }
                    Pending::Index => {
                        self.emit(Instr::Push);
                        self.expr()?;
                        self.emit(Instr::Op(Op::IndexAssign));
                        Ok(Pending::Value)
                    }
                    Pending::Value => Err(self.err_here("left side of '=' is not assignable")),
                }
            }
            ref k if compound_op(k).is_some() => {
                let op = compound_op(k).expect("checked by the guard above");
                self.advance();
                match target {
                    Pending::Local(i) => {
                        self.emit(Instr::LoadLocal(i));
                        self.emit(Instr::Push);
                        self.expr()?;
                        self.emit(Instr::Op(op));
                        self.emit(Instr::StoreLocal(i));
                        Ok(Pending::Value)
                    }
                    Pending::Member(i) => {
                        self.emit(Instr::LoadMember(i));
                        self.emit(Instr::Push);
                        self.expr()?;
                        self.emit(Instr::Op(op));
                        self.emit(Instr::StoreMember(i));
                        Ok(Pending::Value)
                    }
                    Pending::Index => Err(self.err_here("compound assignment to an indexed expression is not supported")),
                    Pending::Value => Err(self.err_here("left side of compound assignment is not assignable")),
                }
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if matches!(self.current().kind, TokenKind::PlusPlus) { Op::Add } else { Op::Sub };
                self.advance();
                match target {
                    Pending::Local(i) => {
                        self.emit(Instr::LoadLocal(i));
                        self.emit(Instr::Push);
                        self.emit(Instr::Push);
                        let c1 = self.add_const(Value::Int(1));
                        self.emit(Instr::LoadConst(c1));
                        self.emit(Instr::Op(op));
                        self.emit(Instr::StoreLocal(i));
                        self.emit(Instr::Pop);
                        Ok(Pending::Value)
                    }
                    Pending::Member(i) => {
                        self.emit(Instr::LoadMember(i));
                        self.emit(Instr::Push);
                        self.emit(Instr::Push);
                        let c1 = self.add_const(Value::Int(1));
                        self.emit(Instr::LoadConst(c1));
                        self.emit(Instr::Op(op));
                        self.emit(Instr::StoreMember(i));
                        self.emit(Instr::Pop);
                        Ok(Pending::Value)
                    }
                    Pending::Index => Err(self.err_here("'++'/'--' on an indexed expression is not supported")),
                    Pending::Value => Err(self.err_here("'++'/'--' target is not assignable")),
                }
            }
            _ => Ok(target),
        }
    }

    fn postfix(&mut self) -> Result<Pending, RavenError> {
        let mut cur = self.primary()?;
        loop {
            if self.check(&TokenKind::Arrow) || self.check(&TokenKind::Dot) {
                self.materialize(cur);
                let name = self.ident()?;
                self.expect(&TokenKind::LParen, "'(' after method name")?;
                self.emit(Instr::Push);
                let nargs = self.call_args()?;
                let msg = self.intern_message(&name);
                self.emit(Instr::Send { msg, nargs });
                cur = Pending::Value;
            } else if self.check(&TokenKind::LBracket) {
                self.materialize(cur);
                self.emit(Instr::Push);
                self.expr()?;
                self.expect(&TokenKind::RBracket, "']' to close index")?;
                cur = Pending::Index;
            } else {
                break;
            }
        }
        Ok(cur)
    }

    /// `(` already consumed. Parses the comma-separated expressions,
    /// pushing each onto the operand stack, through the closing `)`.
    fn call_args(&mut self) -> Result<u32, RavenError> {
        let mut n = 0u32;
        if !self.check(&TokenKind::RParen) {
            loop {
                self.expr()?;
                self.emit(Instr::Push);
                n += 1;
                if self.check(&TokenKind::Comma) {
                    continue;
                }
                break;
            }
            self.expect(&TokenKind::RParen, "')' to close argument list")?;
        }
        Ok(n)
    }

    fn primary_call(&mut self, name: &str) -> Result<Pending, RavenError> {
        self.emit(Instr::PushSelf);
        self.expect(&TokenKind::LParen, "'(' after function name")?;
        let nargs = self.call_args()?;
        let is_builtin = match self.symbols.find(name) {
            Some(r) => matches!(self.heap.get(r), HeapObjectKind::Symbol(s) if s.builtin().is_some()),
            None => false,
        };
        let msg = self.intern_message(name);
        if is_builtin {
            self.emit(Instr::CallBuiltin { msg, nargs });
        } else {
            self.emit(Instr::Send { msg, nargs });
        }
        Ok(Pending::Value)
    }

    fn primary(&mut self) -> Result<Pending, RavenError> {
        let kind = self.current().kind.clone();
        match kind {
            TokenKind::Int(n) => {
                self.advance();
                let idx = self.add_const(Value::Int(n));
                self.emit(Instr::LoadConst(idx));
                Ok(Pending::Value)
            }
            TokenKind::Char(c) => {
                self.advance();
                let idx = self.add_const(Value::Char(c));
                self.emit(Instr::LoadConst(idx));
                Ok(Pending::Value)
            }
            TokenKind::Str(s) | TokenKind::RawStr(s) => {
                self.advance();
                let idx = self.intern_string(&s);
                self.emit(Instr::LoadConst(idx));
                Ok(Pending::Value)
            }
            TokenKind::SymbolLit(s) => {
                self.advance();
                let idx = self.intern_symbol(&s);
                self.emit(Instr::LoadConst(idx));
                Ok(Pending::Value)
            }
            TokenKind::LParen => {
                self.advance();
                self.expr()?;
                self.expect(&TokenKind::RParen, "')' to close parenthesised expression")?;
                Ok(Pending::Value)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut n = 0u32;
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        self.expr()?;
                        self.emit(Instr::Push);
                        n += 1;
                        if self.check(&TokenKind::Comma) {
                            continue;
                        }
                        break;
                    }
                    self.expect(&TokenKind::RBrace, "'}' to close array literal")?;
                }
                self.emit(Instr::LoadArray(n));
                Ok(Pending::Value)
            }
            TokenKind::ColonColon => {
                self.advance();
                let name = self.ident()?;
                self.emit(Instr::PushSelf);
                self.expect(&TokenKind::LParen, "'(' after '::name'")?;
                let nargs = self.call_args()?;
                let msg = self.intern_message(&name);
                self.emit(Instr::SuperSend { msg, nargs });
                Ok(Pending::Value)
            }
            TokenKind::Amp => {
                self.advance();
                let name = self.ident()?;
                let idx = self.intern_message(&name);
                self.emit(Instr::LoadFuncref(idx));
                Ok(Pending::Value)
            }
            TokenKind::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "self" | "this" => {
                        self.emit(Instr::LoadSelf);
                        Ok(Pending::Value)
                    }
                    "args" => {
                        self.emit(Instr::Args);
                        Ok(Pending::Value)
                    }
                    "nil" => {
                        let idx = self.add_const(Value::Nil);
                        self.emit(Instr::LoadConst(idx));
                        Ok(Pending::Value)
                    }
                    "true" => {
                        let idx = self.add_const(Value::Int(1));
                        self.emit(Instr::LoadConst(idx));
                        Ok(Pending::Value)
                    }
                    "false" => {
                        let idx = self.add_const(Value::Int(0));
                        self.emit(Instr::LoadConst(idx));
                        Ok(Pending::Value)
                    }
                    _ => {
                        if matches!(self.current().kind, TokenKind::LParen) {
                            self.primary_call(&name)
                        } else {
                            let sym = self.symbols.intern(self.heap, &name);
                            if let Some((idx, _tag)) = active_writer!(self).find_local(sym) {
                                Ok(Pending::Local(idx))
                            } else if let Some((idx, _tag)) = self.resolve_member(sym) {
                                Ok(Pending::Member(idx))
                            } else {
                                Err(self.err_here(format!("unresolved identifier '{name}'")))
                            }
                        }
                    }
                }
            }
            _ => Err(self.err_here("unexpected token in expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raven_vm::blueprint::blueprint_lookup;
    use raven_vm::interpreter::run_quantum;
    use raven_vm::object::blueprint_instantiate;
    use raven_vm::{Engine, Fiber};
    use std::collections::HashMap;

    /// A fixed single-file filesystem: these tests only ever compile one
    /// blueprint with no `inherit`, so there is nothing to look up on
    /// demand beyond the one path under test.
    struct OneFileFs {
        path: String,
        source: String,
    }

    impl Filesystem for OneFileFs {
        fn find_blueprint(&mut self, _heap: &mut Heap<VmObject>, _symbols: &mut SymbolTable, _path: &VirtPath, _create: bool) -> Option<HeapRef> {
            None
        }
        fn find_object(&mut self, _heap: &mut Heap<VmObject>, _symbols: &mut SymbolTable, _path: &VirtPath, _create: bool) -> Option<HeapRef> {
            None
        }
        fn read(&self, path: &VirtPath, out: &mut String) -> bool {
            if path.as_string() == self.path {
                out.push_str(&self.source);
                true
            } else {
                false
            }
        }
        fn recompile_with_log(&mut self, _heap: &mut Heap<VmObject>, _symbols: &mut SymbolTable, _path: &VirtPath, _log: &mut Vec<String>) -> bool {
            false
        }
        fn ls(&self, _path: &VirtPath, _visit: &mut dyn FnMut(&str)) {}
    }

    /// Compile `source` as `/under_test`, call its zero-arg `run` method to
    /// completion, and return the fiber's accumulator.
    fn eval(source: &str) -> Value {
        let mut engine = Engine::new(100);
        let mut fs = OneFileFs { path: "/under_test".into(), source: source.into() };
        let path = VirtPath::parse("/under_test");
        let bp = compile_blueprint(&mut engine.heap, &mut engine.symbols, &mut fs, &path).expect("compiles");
        let obj = blueprint_instantiate(&mut engine.heap, bp);
        let msg = engine.symbols.intern(&mut engine.heap, "run");
        let func = blueprint_lookup(&engine.heap, bp, msg, 0, true).expect("run exists");

        let mut fiber = Fiber::new(1);
        fiber.push(Value::Ptr(obj));
        fiber.push_frame(&mut engine.heap, func, 0);
        run_quantum(&mut engine.heap, &mut engine.symbols, &engine.builtins, &engine.vars.proxies, &mut fiber);
        fiber.accu
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(eval("int run() { return 2 + 3 * 4; }"), Value::Int(14));
    }

    #[test]
    fn parentheses_override_precedence() {
        assert_eq!(eval("int run() { return (2 + 3) * 4; }"), Value::Int(20));
    }

    #[test]
    fn comparison_binds_looser_than_arithmetic() {
        assert_eq!(eval("int run() { return 1 + 1 == 2 ? 100 : -1; }"), Value::Int(100));
    }

    #[test]
    fn logical_and_short_circuits_without_evaluating_the_right_operand() {
        // Division by zero on the right would crash the fiber if evaluated;
        // short-circuiting on a falsy left operand must skip it.
        assert_eq!(eval("int run() { return 0 && (1 / 0); }"), Value::Int(0));
    }

    #[test]
    fn while_loop_counts_up_to_its_bound() {
        let src = "int run() {\n\
                   int i = 0;\n\
                   int total = 0;\n\
                   while (i < 5) {\n\
                   total += i;\n\
                   i += 1;\n\
                   }\n\
                   return total;\n\
                   }\n";
        assert_eq!(eval(src), Value::Int(10));
    }

    #[test]
    fn do_while_loop_runs_its_body_at_least_once() {
        let src = "int run() {\n\
                   int i = 10;\n\
                   int count = 0;\n\
                   do {\n\
                   count += 1;\n\
                   } while (i < 0);\n\
                   return count;\n\
                   }\n";
        assert_eq!(eval(src), Value::Int(1));
    }

    #[test]
    fn for_loop_accumulates_across_its_full_range() {
        let src = "int run() {\n\
                   int sum = 0;\n\
                   for (int i = 0; i < 4; i += 1) {\n\
                   sum += i;\n\
                   }\n\
                   return sum;\n\
                   }\n";
        assert_eq!(eval(src), Value::Int(6));
    }

    #[test]
    fn postfix_increment_returns_the_pre_increment_value() {
        let src = "int run() {\n\
                   int i = 5;\n\
                   int before = i++;\n\
                   return before * 100 + i;\n\
                   }\n";
        assert_eq!(eval(src), Value::Int(506));
    }
}
