//! Statement compiler.
//!
//! Drives a [`CommandSource`], recognizes statements, and emits bytecode
//! into a [`BytecodeObject`]. `compile` handles one statement, possibly
//! spanning multiple lines for block constructs; `compile_list` loops
//! until the enclosing block terminator or end of input.
//!
//! Statement recognition order: the static keyword table, then the
//! world's special-command registry, then ambiguity resolution between
//! procedure call and expression statement.

pub use context::{
    BlockContext, CompilationFlag, StatementContext, StaticContext, StaticKind,
};
pub use keywords::{Keyword, lookup_keyword};
pub use source::{
    CommandSource, FileCommandSource, MemoryCommandSource, SourceEncoding, SourceState,
};
pub use special::{SimpleSpecialCommand, SpecialCommand, SpecialCompileFn};

use std::rc::Rc;

use self::context::BlockKind;
use crate::{
    bco::{BytecodeObject, Label},
    error::Error,
    expr::{Node, Parser, lookup_builtin_function},
    opcode::{
        BinaryOp, IM_CALL, IM_LOAD, IM_POP, IM_REFUSE_FUNCTIONS, JUMP_ALWAYS, JUMP_CATCH,
        JUMP_IF_EMPTY, JUMP_IF_FALSE, JUMP_IF_TRUE, JUMP_POP_ALWAYS, Major, Scope, SpecialOp,
        StackOp, TernaryOp, UnaryOp,
    },
    optimizer, selection,
    tokenizer::{Token, Tokenizer},
    value::Value,
    world::World,
};

mod context;
mod keywords;
mod source;
mod special;

/// Most naive code generation, not even label relocation.
pub const MIN_OPTIMISATION_LEVEL: i32 = -1;
/// Strongest optimisation level.
pub const MAX_OPTIMISATION_LEVEL: i32 = 3;
/// Default optimisation level.
pub const DEFAULT_OPTIMISATION_LEVEL: i32 = 1;

/// Outcome of compiling one statement or statement list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementResult {
    /// End of input reached. Only without `WantTerminators`.
    EndOfInput,
    /// A terminator statement is in the current token. Only with
    /// `WantTerminators`.
    Terminator,
    /// A single-line statement was compiled.
    CompiledStatement,
    /// A multi-line statement was compiled. Only without `RefuseBlocks`.
    CompiledBlock,
    /// An expression was compiled; its result remains on the stack. Only
    /// without `ExpressionsAreStatements`.
    CompiledExpression,
}

/// The statement compiler.
pub struct StatementCompiler<'a> {
    source: &'a mut dyn CommandSource,
    world: &'a mut World,
    allow_local_types: bool,
    allow_local_subs: bool,
    optimisation_level: i32,
}

impl<'a> StatementCompiler<'a> {
    /// Creates a compiler and positions the source on its first line.
    pub fn new(source: &'a mut dyn CommandSource, world: &'a mut World) -> Result<Self, Error> {
        source.read_next_line()?;
        Ok(Self {
            source,
            world,
            allow_local_types: false,
            allow_local_subs: false,
            optimisation_level: DEFAULT_OPTIMISATION_LEVEL,
        })
    }

    /// Sets the optimisation level, clamped to the valid range.
    pub fn set_optimisation_level(&mut self, level: i32) {
        self.optimisation_level = level.clamp(MIN_OPTIMISATION_LEVEL, MAX_OPTIMISATION_LEVEL);
    }

    /// Runs the configured optimiser passes and resolves labels.
    pub fn finish_bco(&self, bco: &mut BytecodeObject) -> Result<(), Error> {
        if self.optimisation_level > 0 {
            optimizer::optimize(bco, self.optimisation_level);
        }
        if self.optimisation_level >= 0 {
            bco.relocate()?;
        }
        Ok(())
    }

    /// Compiles one statement from the current source line.
    ///
    /// Leaves the input at the end of the statement; for multi-line
    /// statements, after its terminator. The caller advances to the next
    /// line.
    pub fn compile(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        if self.source.is_eof() {
            if scc.has_flag(CompilationFlag::WantTerminators) {
                return Err(Error::new("Unexpected end of script"));
            }
            return Ok(StatementResult::EndOfInput);
        }

        bco.add_line_number(self.source.line_number());

        let tok = self.source.tokenizer();
        match tok.current_token() {
            Token::End => Ok(StatementResult::CompiledStatement),
            Token::Identifier => {
                let name = tok.current_string().to_owned();
                match lookup_keyword(&name) {
                    Some(Keyword::Abort) => self.compile_abort(bco, scc),
                    Some(Keyword::Bind) => self.compile_bind(bco, scc),
                    Some(Keyword::Break) => {
                        self.source.tokenizer().read_next_token()?;
                        self.parse_end_of_line()?;
                        scc.compile_break(bco)?;
                        Ok(StatementResult::CompiledStatement)
                    }
                    Some(Keyword::Call) => self.compile_call(bco, scc),
                    Some(Keyword::Continue) => {
                        self.source.tokenizer().read_next_token()?;
                        self.parse_end_of_line()?;
                        scc.compile_continue(bco)?;
                        Ok(StatementResult::CompiledStatement)
                    }
                    Some(Keyword::CreateKeymap) => self.compile_create_keymap(bco, scc),
                    Some(Keyword::CreatePlanetProperty) => {
                        self.compile_create_property(bco, SpecialOp::DefPlanetProperty, "PLANET.")
                    }
                    Some(Keyword::CreateShipProperty) => {
                        self.compile_create_property(bco, SpecialOp::DefShipProperty, "SHIP.")
                    }
                    Some(Keyword::Dim) => {
                        self.source.tokenizer().read_next_token()?;
                        self.compile_dim(bco, scc)
                    }
                    Some(Keyword::Do) => self.compile_do(bco, scc),
                    Some(Keyword::End) => {
                        self.source.tokenizer().read_next_token()?;
                        self.parse_end_of_line()?;
                        bco.add_instruction(Major::Special, SpecialOp::Terminate as u8, 0);
                        Ok(StatementResult::CompiledStatement)
                    }
                    Some(
                        Keyword::Case
                        | Keyword::Else
                        | Keyword::EndIf
                        | Keyword::EndOn
                        | Keyword::EndSelect
                        | Keyword::EndSub
                        | Keyword::EndFunction
                        | Keyword::EndTry
                        | Keyword::EndWith
                        | Keyword::Loop
                        | Keyword::Next,
                    ) => {
                        if scc.has_flag(CompilationFlag::WantTerminators) {
                            Ok(StatementResult::Terminator)
                        } else {
                            Err(Error::misplaced_keyword(&name))
                        }
                    }
                    Some(Keyword::EndStruct) => Err(Error::misplaced_keyword("EndStruct")),
                    Some(Keyword::Eval) => self.compile_eval(bco, scc),
                    Some(Keyword::For) => self.compile_for(bco, scc),
                    Some(Keyword::ForEach) => self.compile_foreach(bco, scc),
                    Some(Keyword::Function) => self.compile_sub(bco, scc, false, Scope::Shared),
                    Some(Keyword::If) => self.compile_if(bco, scc),
                    Some(Keyword::Load) => self.compile_load(bco, scc, true),
                    Some(Keyword::Local) => self.compile_scope(bco, scc, Scope::Local),
                    Some(Keyword::On) => self.compile_on(bco, scc),
                    Some(Keyword::Option) => self.compile_option(scc),
                    Some(Keyword::Print) => self.compile_print(bco, scc),
                    Some(Keyword::ReDim) => self.compile_redim(bco, scc),
                    Some(Keyword::Restart) => Err(Error::misplaced_keyword("Restart")),
                    Some(Keyword::Return) => {
                        self.source.tokenizer().read_next_token()?;
                        self.compile_return(bco, scc)
                    }
                    Some(Keyword::RunHook) => self.compile_run_hook(bco, scc),
                    Some(Keyword::Select) => self.compile_select(bco, scc),
                    Some(Keyword::SelectionExec) => self.compile_selection_exec(bco, scc),
                    Some(Keyword::Shared) => self.compile_scope(bco, scc, Scope::Shared),
                    Some(Keyword::Static) => self.compile_scope(bco, scc, Scope::Static),
                    Some(Keyword::Stop) => {
                        self.source.tokenizer().read_next_token()?;
                        self.parse_end_of_line()?;
                        bco.add_instruction(Major::Special, SpecialOp::Suspend as u8, 0);
                        Ok(StatementResult::CompiledStatement)
                    }
                    Some(Keyword::Struct) => self.compile_struct(bco, scc, Scope::Shared),
                    Some(Keyword::Sub) => self.compile_sub(bco, scc, true, Scope::Shared),
                    Some(Keyword::Try) => self.compile_try(bco, scc),
                    Some(Keyword::TryLoad) => self.compile_load(bco, scc, false),
                    Some(Keyword::Until) => Err(Error::misplaced_keyword("Until")),
                    Some(Keyword::UseKeymap) => self.compile_use_keymap(bco, scc),
                    Some(Keyword::While) => Err(Error::misplaced_keyword("While")),
                    Some(Keyword::With) => self.compile_with(bco, scc),
                    None => {
                        if let Some(command) = self.world.lookup_special_command(&name) {
                            command.compile_command(self.source.tokenizer(), bco, scc)?;
                            self.parse_end_of_line()?;
                            Ok(StatementResult::CompiledStatement)
                        } else {
                            self.compile_ambiguous_statement(bco, scc)
                        }
                    }
                }
            }
            _ => self.compile_expression_statement(bco, scc),
        }
    }

    /// Compiles statements until the block terminator or end of input.
    pub fn compile_list(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        loop {
            match self.compile(bco, scc)? {
                r @ (StatementResult::EndOfInput | StatementResult::Terminator) => return Ok(r),
                StatementResult::CompiledExpression => {
                    // a value nobody asked for remains on the stack
                    bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
                    self.source.read_next_line()?;
                }
                _ => self.source.read_next_line()?,
            }
        }
    }

    /* ---------------- ambiguity resolution ---------------- */

    /// A statement starting with an unknown identifier is either a
    /// procedure call or an expression statement.
    ///
    /// With a static context the identifier is simply looked up. Without
    /// one, the second token decides where it can: a token that can only
    /// start an expression argument means a call, one that can only
    /// continue an expression means an expression. The remaining cases
    /// compile both forms and select at run time by inspecting the name.
    fn compile_ambiguous_statement(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let name = self.source.tokenizer().current_string().to_owned();
        if let Some(static_context) = scc.static_context() {
            return match static_context.lookup_kind(&name) {
                Some(StaticKind::Procedure) => self.compile_procedure_call(bco, scc),
                Some(StaticKind::Value) => self.compile_expression_statement(bco, scc),
                None => {
                    if lookup_builtin_function(&name).is_some() {
                        self.compile_expression_statement(bco, scc)
                    } else {
                        Err(Error::unknown_identifier(&name))
                    }
                }
            };
        }

        let next = {
            let mut peek = self.source.tokenizer().clone();
            peek.read_next_token()?
        };
        match next {
            // possible firsts but not possible seconds: subroutine call
            Token::Integer
            | Token::Float
            | Token::String
            | Token::Boolean
            | Token::Identifier
            | Token::Not => self.compile_procedure_call(bco, scc),

            // possible seconds but not possible firsts: expression
            Token::And
            | Token::Or
            | Token::Xor
            | Token::Mod
            | Token::NotEqual
            | Token::GreaterEqual
            | Token::LessEqual
            | Token::Assign
            | Token::Ampersand
            | Token::Multiply
            | Token::Slash
            | Token::Backslash
            | Token::Caret
            | Token::Equal
            | Token::Less
            | Token::Greater
            | Token::Dot
            | Token::Arrow
            | Token::Semicolon => self.compile_expression_statement(bco, scc),

            Token::Comma | Token::Invalid | Token::RParen | Token::Colon => {
                Err(Error::new("Syntax error"))
            }

            Token::End => self.compile_ambiguous_single_word(&name, bco, scc),

            // possible firsts and seconds: decide at run time
            Token::Hash | Token::Plus | Token::Minus | Token::LParen => {
                self.compile_ambiguous_runtime_switch(&name, next == Token::LParen, bco, scc)
            }
        }
    }

    /// A statement that is a single bare word: call it if the name holds
    /// a procedure, otherwise evaluate it for its effect.
    fn compile_ambiguous_single_word(
        &mut self,
        name: &str,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let lskip = bco.make_label();
        bco.add_variable_reference(Major::Push, name, scc);
        bco.add_instruction(Major::Unary, UnaryOp::IsProcedure as u8, 0);
        bco.add_jump(JUMP_IF_FALSE | JUMP_IF_EMPTY | JUMP_POP_ALWAYS, lskip);
        bco.add_variable_reference(Major::Push, name, scc);
        bco.add_instruction(Major::Indirect, IM_CALL | IM_REFUSE_FUNCTIONS, 0);
        bco.add_label(lskip);
        Ok(StatementResult::CompiledStatement)
    }

    /// Compiles a statement both as procedure call and as expression and
    /// emits a run-time switch between whichever forms compiled.
    fn compile_ambiguous_runtime_switch(
        &mut self,
        name: &str,
        paren: bool,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let saved = self.source.tokenizer().clone();

        let mut proc_bco = BytecodeObject::new();
        proc_bco.copy_local_variables_from(bco);
        let proc_result = self.compile_procedure_call(&mut proc_bco, scc);

        *self.source.tokenizer() = saved;
        let mut expr_bco = BytecodeObject::new();
        expr_bco.copy_local_variables_from(bco);
        let expr_scc = scc
            .derive()
            .with_flag(CompilationFlag::ExpressionsAreStatements);
        let expr_result = self.compile_expression_statement(&mut expr_bco, &expr_scc);

        match (proc_result, expr_result) {
            (Ok(_), Ok(_)) => {
                // Both forms are valid; switch on what the name holds at
                // run time. The catch protection covers names that only
                // exist as builtin functions and would make the plain
                // push fail even though the expression form is fine.
                let protect = paren
                    && lookup_builtin_function(name).is_some()
                    && !bco.has_local_variable(name);
                let lexpr = bco.make_label();
                let ldone = bco.make_label();
                let lfail = bco.make_label();
                if protect {
                    bco.add_jump(JUMP_CATCH, lfail);
                }
                bco.add_variable_reference(Major::Push, name, scc);
                if protect {
                    bco.add_instruction(Major::Special, SpecialOp::Uncatch as u8, 0);
                }
                bco.add_instruction(Major::Unary, UnaryOp::IsProcedure as u8, 0);
                bco.add_jump(JUMP_IF_FALSE | JUMP_IF_EMPTY | JUMP_POP_ALWAYS, lexpr);
                bco.append(proc_bco);
                bco.add_jump(JUMP_ALWAYS, ldone);
                if protect {
                    bco.add_label(lfail);
                    bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
                }
                bco.add_label(lexpr);
                bco.append(expr_bco);
                bco.add_label(ldone);
                Ok(StatementResult::CompiledStatement)
            }
            (Ok(_), Err(_)) => {
                bco.append(proc_bco);
                Ok(StatementResult::CompiledStatement)
            }
            (Err(_), Ok(_)) => {
                bco.append(expr_bco);
                Ok(StatementResult::CompiledStatement)
            }
            (Err(proc_error), Err(_)) => Err(proc_error),
        }
    }

    /// Compiles `name arg, arg...` into an indirect procedure call.
    fn compile_procedure_call(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let tok = self.source.tokenizer();
        let name = tok.current_string().to_owned();
        tok.read_next_token()?;

        let args = parse_command_argument_list(self.source.tokenizer())?;
        for arg in &args {
            arg.compile_value(bco, scc)?;
        }

        bco.add_variable_reference(Major::Push, &name, scc);
        bco.add_instruction(
            Major::Indirect,
            IM_CALL | IM_REFUSE_FUNCTIONS,
            arg_count(&args)?,
        );
        Ok(StatementResult::CompiledStatement)
    }

    /// Compiles an expression in statement position.
    fn compile_expression_statement(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let mut node = Parser::new(self.source.tokenizer()).parse()?;
        if self.source.tokenizer().current_token() != Token::End {
            return Err(Error::garbage_at_end(true));
        }

        // a top-level equality in statement position is an assignment
        if matches!(node, Node::Case { .. }) {
            let candidate = std::mem::replace(&mut node, Node::Literal(Value::Null));
            node = candidate.case_to_assignment();
        }

        if scc.has_flag(CompilationFlag::ExpressionsAreStatements) {
            node.compile_effect(bco, scc)?;
            Ok(StatementResult::CompiledStatement)
        } else {
            node.compile_value(bco, scc)?;
            Ok(StatementResult::CompiledExpression)
        }
    }

    /* ---------------- simple statements ---------------- */

    /// `Abort [message]`
    fn compile_abort(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        let args = parse_command_argument_list(self.source.tokenizer())?;
        if args.len() > 1 {
            return Err(Error::too_many_arguments("Abort"));
        }
        match args.first() {
            Some(node) => node.compile_value(bco, scc)?,
            None => bco.add_push_literal(&Value::Null),
        }
        bco.add_instruction(Major::Special, SpecialOp::Throw as u8, 0);
        Ok(StatementResult::CompiledStatement)
    }

    /// `Bind keymap key := action, ...`
    fn compile_bind(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        self.compile_name_string(bco, scc, "keymap name")?;
        bco.add_instruction(Major::Unary, UnaryOp::KeyLookup as u8, 0);

        loop {
            let key = Parser::new(self.source.tokenizer()).parse_na()?;
            key.compile_value(bco, scc)?;

            if !self.source.tokenizer().check_advance(Token::Assign)? {
                return Err(Error::expect_symbol(":="));
            }

            let action = Parser::new(self.source.tokenizer()).parse_na()?;
            action.compile_value(bco, scc)?;

            bco.add_instruction(Major::Ternary, TernaryOp::KeyAdd as u8, 0);

            if !parse_next(self.source.tokenizer())? {
                break;
            }
        }

        bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
        Ok(StatementResult::CompiledStatement)
    }

    /// `Call expr arg, ...`
    fn compile_call(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;

        let procedure = Parser::new(self.source.tokenizer()).parse()?;
        self.source.tokenizer().check_advance(Token::Comma)?;

        let args = parse_command_argument_list(self.source.tokenizer())?;
        for arg in &args {
            arg.compile_value(bco, scc)?;
        }

        // `Call Foo +1` parses as an addition; that is practically never
        // what the author meant, so say so.
        if procedure.is_binary(BinaryOp::ConcatEmpty)
            || procedure.is_binary(BinaryOp::Add)
            || procedure.is_binary(BinaryOp::Sub)
        {
            let mut warning =
                Error::new("Binary operator in first operand to 'Call' is most likely not what you want");
            self.source.add_trace_to(&mut warning);
            self.world.log_warning(&warning);
        }

        procedure.compile_value(bco, scc)?;
        bco.add_instruction(
            Major::Indirect,
            IM_CALL | IM_REFUSE_FUNCTIONS,
            arg_count(&args)?,
        );
        Ok(StatementResult::CompiledStatement)
    }

    /// `CreateKeymap name(parent...), ...`
    fn compile_create_keymap(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        loop {
            self.compile_name_string(bco, scc, "keymap name")?;
            bco.add_instruction(Major::Unary, UnaryOp::KeyCreate as u8, 0);
            if self.source.tokenizer().check_advance(Token::LParen)?
                && !self.source.tokenizer().check_advance(Token::RParen)?
            {
                loop {
                    self.compile_name_string(bco, scc, "parent keymap name")?;
                    bco.add_instruction(Major::Unary, UnaryOp::KeyLookup as u8, 0);
                    bco.add_instruction(Major::Binary, BinaryOp::KeyAddParent as u8, 0);
                    let tok = self.source.tokenizer();
                    if tok.check_advance(Token::Comma)? {
                        continue;
                    }
                    if tok.check_advance(Token::RParen)? {
                        break;
                    }
                    return Err(Error::expect_symbol2(",", ")"));
                }
            }
            bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);

            if !parse_next(self.source.tokenizer())? {
                break;
            }
        }
        Ok(StatementResult::CompiledStatement)
    }

    /// `CreateShipProperty name, ...` / `CreatePlanetProperty name, ...`
    fn compile_create_property(
        &mut self,
        bco: &mut BytecodeObject,
        minor: SpecialOp,
        prefix: &str,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        loop {
            let tok = self.source.tokenizer();
            if tok.current_token() != Token::Identifier {
                return Err(Error::expect_identifier("property name"));
            }
            let name = strip_prefix(tok.current_string(), prefix)?;
            let index = bco.add_name(&name);
            bco.add_instruction(Major::Special, minor as u8, index);
            self.source.tokenizer().read_next_token()?;
            if !parse_next(self.source.tokenizer())? {
                break;
            }
        }
        Ok(StatementResult::CompiledStatement)
    }

    /// `Dim [Local|Static|Shared] name [initializer], ...`
    fn compile_dim(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let tok = self.source.tokenizer();
        let scope = if tok.check_advance_keyword("LOCAL")? {
            Scope::Local
        } else if tok.check_advance_keyword("STATIC")? {
            Scope::Static
        } else if tok.check_advance_keyword("SHARED")? {
            Scope::Shared
        } else {
            Scope::Local
        };
        self.compile_variable_definition(bco, scc, scope)?;
        Ok(StatementResult::CompiledStatement)
    }

    /// `Local` / `Static` / `Shared` scope statements; also the entry
    /// point for experimental local subs and types.
    fn compile_scope(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        scope: Scope,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;

        let tok = self.source.tokenizer();
        if tok.current_token() == Token::Identifier {
            let word = tok.current_string();
            if self.allow_local_subs {
                if word == "SUB" {
                    return self.compile_sub(bco, scc, true, scope);
                }
                if word == "FUNCTION" {
                    return self.compile_sub(bco, scc, false, scope);
                }
            }
            if self.allow_local_types && word == "STRUCT" {
                return self.compile_struct(bco, scc, scope);
            }
        }

        self.compile_variable_definition(bco, scc, scope)?;
        Ok(StatementResult::CompiledStatement)
    }

    /// `Do [While c|Until c] ... Loop [While c|Until c]`
    fn compile_do(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        validate_multiline(scc)?;

        let lagain = bco.make_label();
        let ldo = bco.make_label();
        let lbreak = bco.make_label();
        let lcontinue = bco.make_label();
        bco.add_label(lagain);

        // head condition; null counts as false and ends the loop
        self.source.tokenizer().read_next_token()?;
        if self.source.tokenizer().check_advance_keyword("WHILE")? {
            self.compile_argument_condition(bco, scc, ldo, lbreak)?;
        } else if self.source.tokenizer().check_advance_keyword("UNTIL")? {
            self.compile_argument_condition(bco, scc, lbreak, ldo)?;
        }
        self.parse_end_of_line()?;

        self.source.read_next_line()?;
        bco.add_label(ldo);
        let block = BlockContext {
            kind: BlockKind::Loop {
                lcontinue,
                lbreak,
                break_drops: 0,
                cleanup_drops: 0,
            },
            parent: scc.block(),
        };
        let subcc = scc
            .derive()
            .without_flag(CompilationFlag::LinearExecution)
            .with_block(&block)
            .block_syntax();
        self.compile_list(bco, &subcc)?;
        if !self.source.tokenizer().check_advance_keyword("LOOP")? {
            return Err(Error::expect_keyword("Loop"));
        }

        bco.add_label(lcontinue);
        if self.source.tokenizer().check_advance_keyword("UNTIL")? {
            self.compile_argument_condition(bco, scc, lbreak, lagain)?;
        } else if self.source.tokenizer().check_advance_keyword("WHILE")? {
            self.compile_argument_condition(bco, scc, lagain, lbreak)?;
        } else {
            bco.add_jump(JUMP_ALWAYS, lagain);
        }
        self.parse_end_of_line()?;

        bco.add_label(lbreak);
        Ok(StatementResult::CompiledBlock)
    }

    /// `Eval stmt, ...`
    fn compile_eval(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        let args = parse_command_argument_list(self.source.tokenizer())?;
        if args.is_empty() {
            return Err(Error::too_few_arguments("Eval"));
        }
        for arg in &args {
            arg.compile_value(bco, scc)?;
        }
        bco.add_instruction(Major::Special, SpecialOp::EvalStatement as u8, arg_count(&args)?);
        Ok(StatementResult::CompiledStatement)
    }

    /// `For var := start To end [Do] body [Next]`
    fn compile_for(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;

        let tok = self.source.tokenizer();
        if tok.current_token() != Token::Identifier {
            return Err(Error::expect_identifier("variable name"));
        }
        let var = tok.current_string().to_owned();
        tok.read_next_token()?;

        if !tok.check_advance(Token::Equal)? && !tok.check_advance(Token::Assign)? {
            return Err(Error::expect_symbol2("=", ":="));
        }

        let start = Parser::new(self.source.tokenizer()).parse()?;
        if !self.source.tokenizer().check_advance_keyword("TO")? {
            return Err(Error::expect_keyword("To"));
        }
        let end = Parser::new(self.source.tokenizer()).parse()?;

        let lagain = bco.make_label();
        let lcontinue = bco.make_label();
        let lout = bco.make_label();
        let lbreak = bco.make_label();

        // when both bounds are integer literals and the loop provably
        // enters, the counter check moves to the loop tail
        if self.optimisation_level >= 1 {
            if let (Some(Value::Int(s)), Some(Value::Int(e))) =
                (start.literal_value(), end.literal_value())
            {
                if s <= e {
                    start.compile_value(bco, scc)?;
                    bco.add_variable_reference(Major::Pop, &var, scc);
                    bco.add_label(lagain);

                    let block = BlockContext {
                        kind: BlockKind::Loop {
                            lcontinue,
                            lbreak,
                            break_drops: 0,
                            cleanup_drops: 0,
                        },
                        parent: scc.block(),
                    };
                    let subcc = scc
                        .derive()
                        .without_flag(CompilationFlag::LinearExecution)
                        .with_block(&block);
                    let result = self.compile_loop_body(bco, &subcc)?;

                    bco.add_label(lcontinue);
                    bco.add_variable_reference(Major::Push, &var, scc);
                    bco.add_instruction(Major::Unary, UnaryOp::Inc as u8, 0);
                    bco.add_variable_reference(Major::Store, &var, scc);
                    end.compile_value(bco, scc)?;
                    bco.add_instruction(Major::Binary, BinaryOp::CompareLe as u8, 0);
                    bco.add_jump(JUMP_IF_TRUE | JUMP_POP_ALWAYS, lagain);
                    bco.add_label(lbreak);
                    return Ok(result);
                }
            }
        }

        let end_is_literal = end.literal_value().is_some() && self.optimisation_level >= 0;

        if !end_is_literal {
            end.compile_value(bco, scc)?;
            bco.add_instruction(Major::Unary, UnaryOp::Pos as u8, 0);
        }
        start.compile_value(bco, scc)?;
        bco.add_instruction(Major::Unary, UnaryOp::Pos as u8, 0);
        bco.add_label(lagain);
        bco.add_variable_reference(Major::Store, &var, scc);
        if end_is_literal {
            end.compile_value(bco, scc)?;
        } else {
            bco.add_instruction(Major::Stack, StackOp::Dup as u8, 1);
        }
        // numbers only here, case options do not apply
        bco.add_instruction(Major::Binary, BinaryOp::CompareLe as u8, 0);
        bco.add_jump(JUMP_IF_FALSE | JUMP_IF_EMPTY | JUMP_POP_ALWAYS, lout);

        let drops = u16::from(!end_is_literal);
        let block = BlockContext {
            kind: BlockKind::Loop {
                lcontinue,
                lbreak,
                break_drops: drops,
                cleanup_drops: drops,
            },
            parent: scc.block(),
        };
        let subcc = scc
            .derive()
            .without_flag(CompilationFlag::LinearExecution)
            .with_block(&block);
        let result = self.compile_loop_body(bco, &subcc)?;

        bco.add_label(lcontinue);
        bco.add_variable_reference(Major::Push, &var, scc);
        bco.add_instruction(Major::Unary, UnaryOp::Inc as u8, 0);
        bco.add_jump(JUMP_ALWAYS, lagain);
        bco.add_label(lout);
        if !end_is_literal {
            bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
        }
        bco.add_label(lbreak);

        Ok(result)
    }

    /// `ForEach set [As var] [Do] body [Next]`
    fn compile_foreach(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let lagain = bco.make_label();
        let lend = bco.make_label();
        let lcontinue = bco.make_label();

        self.source.tokenizer().read_next_token()?;
        let set = Parser::new(self.source.tokenizer()).parse()?;

        if self.source.tokenizer().check_advance_keyword("AS")? {
            // named induction variable holding the iteration context
            let tok = self.source.tokenizer();
            if tok.current_token() != Token::Identifier {
                return Err(Error::expect_identifier("variable name"));
            }
            let name = tok.current_string().to_owned();
            self.validate_name(&name)?;
            self.source.tokenizer().read_next_token()?;

            set.compile_value(bco, scc)?;
            bco.add_instruction(Major::Special, SpecialOp::First as u8, 0);
            bco.add_label(lagain);
            bco.add_variable_reference(Major::Store, &name, scc);
            bco.add_jump(JUMP_IF_FALSE | JUMP_IF_EMPTY, lend);

            let block = BlockContext {
                kind: BlockKind::Loop {
                    lcontinue,
                    lbreak: lend,
                    break_drops: 0,
                    cleanup_drops: 1,
                },
                parent: scc.block(),
            };
            let subcc = scc
                .derive()
                .without_flag(CompilationFlag::LinearExecution)
                .with_block(&block);
            let result = self.compile_loop_body(bco, &subcc)?;

            bco.add_label(lcontinue);
            bco.add_instruction(Major::Special, SpecialOp::Next as u8, 0);
            bco.add_jump(JUMP_ALWAYS, lagain);
            bco.add_label(lend);
            bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
            Ok(result)
        } else {
            // iteration context goes on the frame context stack
            set.compile_value(bco, scc)?;
            bco.add_instruction(Major::Special, SpecialOp::FirstIndex as u8, 0);
            bco.add_jump(JUMP_IF_FALSE | JUMP_IF_EMPTY | JUMP_POP_ALWAYS, lend);
            bco.add_label(lagain);

            let block = BlockContext {
                kind: BlockKind::IndexLoop { lcontinue, lend },
                parent: scc.block(),
            };
            let subcc = scc
                .derive()
                .without_flag(CompilationFlag::LocalContext)
                .without_flag(CompilationFlag::LinearExecution)
                .with_static_context(None)
                .with_block(&block);
            let result = self.compile_loop_body(bco, &subcc)?;

            bco.add_label(lcontinue);
            bco.add_instruction(Major::Special, SpecialOp::NextIndex as u8, 0);
            bco.add_jump(JUMP_IF_TRUE | JUMP_POP_ALWAYS, lagain);
            bco.add_label(lend);
            Ok(result)
        }
    }

    /// `If c [Then] ... {Else If c} [Else] EndIf`
    fn compile_if(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let mut ift = bco.make_label();
        let mut iff = bco.make_label();

        self.source.tokenizer().read_next_token()?;
        self.compile_argument_condition(bco, scc, ift, iff)?;
        bco.add_label(ift);

        let oneliner = self.source.tokenizer().check_advance_keyword("THEN")?;

        if self.source.tokenizer().current_token() != Token::End {
            if !oneliner {
                return Err(Error::expect_keyword("Then"));
            }
            let subcc = scc
                .derive()
                .one_line_syntax()
                .without_flag(CompilationFlag::LinearExecution);
            self.compile(bco, &subcc)?;
            bco.add_label(iff);
            return Ok(StatementResult::CompiledStatement);
        }

        validate_multiline(scc)?;
        self.source.read_next_line()?;

        let block_scc = scc
            .derive()
            .block_syntax()
            .without_flag(CompilationFlag::LinearExecution);
        self.compile_list(bco, &block_scc)?;

        let endif = bco.make_label();
        let mut had_else = false;
        loop {
            if self.source.tokenizer().check_advance_keyword("ELSE")? {
                bco.add_jump(JUMP_ALWAYS, endif);
                bco.add_label(iff);
                if self.source.tokenizer().check_advance_keyword("IF")? {
                    ift = bco.make_label();
                    iff = bco.make_label();
                    self.compile_argument_condition(bco, scc, ift, iff)?;
                    bco.add_label(ift);
                    self.source.tokenizer().check_advance_keyword("THEN")?;
                } else {
                    if had_else {
                        return Err(Error::misplaced_keyword("Else"));
                    }
                    had_else = true;
                }
                self.parse_end_of_line()?;
                self.compile_list(bco, &block_scc)?;
            } else if self.source.tokenizer().check_advance_keyword("ENDIF")? {
                self.parse_end_of_line()?;
                bco.add_label(endif);
                if !had_else {
                    bco.add_label(iff);
                }
                break;
            } else {
                return Err(Error::expect_keyword2("Else", "EndIf"));
            }
        }
        Ok(StatementResult::CompiledBlock)
    }

    /// `Load name` / `TryLoad name`
    fn compile_load(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        must_succeed: bool,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        let node = Parser::new(self.source.tokenizer()).parse()?;
        self.parse_end_of_line()?;

        // with PreexecuteLoad a literal file name is compiled right now
        if scc.has_flag(CompilationFlag::PreexecuteLoad) {
            if let Some(value) = node.literal_value() {
                let file_name = value.to_text(false);
                if let Some((path, content)) = self.world.open_load_file(&file_name) {
                    let sub = self.world.compile_file(
                        &path,
                        &content,
                        bco.origin(),
                        self.optimisation_level,
                    )?;
                    bco.add_push_literal(&Value::subroutine(sub));
                    bco.add_instruction(Major::Indirect, IM_CALL, 0);
                    return Ok(StatementResult::CompiledStatement);
                }
            }
        }

        node.compile_value(bco, scc)?;
        bco.add_instruction(Major::Special, SpecialOp::Load as u8, 0);
        if must_succeed {
            let lab = bco.make_label();
            bco.add_jump(JUMP_IF_EMPTY, lab);
            bco.add_instruction(Major::Special, SpecialOp::Throw as u8, 0);
            bco.add_label(lab);
        }
        bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
        Ok(StatementResult::CompiledStatement)
    }

    /// `On event Do body [EndOn]`
    fn compile_on(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        self.compile_name_string(bco, scc, "hook name")?;

        let oneliner = self.source.tokenizer().check_advance_keyword("DO")?;

        // the handler body is an anonymous procedure; Return is refused
        let mut nbco = BytecodeObject::new();
        nbco.set_is_procedure(true);
        nbco.set_file_name(bco.file_name());
        nbco.set_origin(bco.origin());

        let hook_scc = StatementContext::new()
            .with_globals(self.world.globals_store())
            .with_flag(CompilationFlag::LocalContext)
            .with_flag(CompilationFlag::LinearExecution)
            .refusing_return();

        let result;
        if self.source.tokenizer().current_token() != Token::End {
            if !oneliner {
                return Err(Error::expect_keyword("Do"));
            }
            self.compile(&mut nbco, &hook_scc.one_line_syntax())?;
            result = StatementResult::CompiledStatement;
        } else {
            validate_multiline(scc)?;
            self.source.read_next_line()?;
            self.compile_list(&mut nbco, &hook_scc.block_syntax())?;
            if !self.source.tokenizer().check_advance_keyword("ENDON")? {
                return Err(Error::expect_keyword("EndOn"));
            }
            self.parse_end_of_line()?;
            result = StatementResult::CompiledBlock;
        }

        self.finish_bco(&mut nbco)?;
        bco.add_push_literal(&Value::subroutine(Rc::new(nbco)));
        bco.add_instruction(Major::Special, SpecialOp::AddHook as u8, 0);
        Ok(result)
    }

    /// `Option name(arg), ...`
    fn compile_option(&mut self, scc: &StatementContext<'_>) -> Result<StatementResult, Error> {
        // refused in one-line contexts to stop `If x Then Option ...`
        validate_multiline(scc)?;

        self.source.tokenizer().read_next_token()?;
        loop {
            let tok = self.source.tokenizer();
            if tok.current_token() != Token::Identifier {
                return Err(Error::expect_identifier("option name"));
            }
            let name = tok.current_string().to_owned();
            tok.read_next_token()?;

            match name.as_str() {
                "ENCODING" => {
                    let tok = self.source.tokenizer();
                    if !tok.check_advance(Token::LParen)? {
                        return Err(Error::expect_symbol("("));
                    }
                    if tok.current_token() != Token::String {
                        return Err(Error::new("Expecting string"));
                    }
                    let charset_name = tok.current_string().to_owned();
                    tok.read_next_token()?;
                    if !tok.check_advance(Token::RParen)? {
                        return Err(Error::expect_symbol(")"));
                    }
                    let encoding = SourceEncoding::by_name(&charset_name)
                        .ok_or_else(|| Error::new(format!("Unknown encoding, {charset_name}")))?;
                    if !self.source.set_encoding(encoding) {
                        return Err(Error::misplaced_keyword("Option Encoding"));
                    }
                }
                "LOCALTYPES" => {
                    self.allow_local_types =
                        parse_option_argument(self.source.tokenizer(), 0, 1)? != 0;
                }
                "LOCALSUBS" => {
                    self.allow_local_subs =
                        parse_option_argument(self.source.tokenizer(), 0, 1)? != 0;
                }
                "OPTIMIZE" => {
                    self.optimisation_level = parse_option_argument(
                        self.source.tokenizer(),
                        MIN_OPTIMISATION_LEVEL,
                        MAX_OPTIMISATION_LEVEL,
                    )?;
                }
                _ => {
                    // unknown options are skipped for forward compatibility
                    let tok = self.source.tokenizer();
                    if tok.check_advance(Token::LParen)? {
                        let mut level = 1;
                        while level != 0 {
                            match tok.current_token() {
                                Token::LParen => level += 1,
                                Token::RParen => level -= 1,
                                Token::End => return Err(Error::expect_symbol(")")),
                                _ => {}
                            }
                            tok.read_next_token()?;
                        }
                    }
                }
            }

            if !parse_next(self.source.tokenizer())? {
                break;
            }
        }
        Ok(StatementResult::CompiledStatement)
    }

    /// `Print [#fd,] item, ...`
    fn compile_print(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        let nodes = parse_command_argument_list(self.source.tokenizer())?;

        // a leading `#fd` argument redirects to a file
        let mut first = 0;
        if nodes
            .first()
            .is_some_and(|n| n.is_unary(UnaryOp::FileNr))
        {
            first = 1;
            nodes[0].compile_value(bco, scc)?;
        }

        if nodes.len() == first {
            bco.add_push_literal(&Value::str(""));
        } else {
            nodes[first].compile_value(bco, scc)?;
            for node in &nodes[first + 1..] {
                node.compile_value(bco, scc)?;
                bco.add_instruction(Major::Binary, BinaryOp::Concat as u8, 0);
            }
        }

        if first == 0 {
            bco.add_instruction(Major::Special, SpecialOp::Print as u8, 0);
        } else {
            let name = bco.add_name("CC$PRINT");
            bco.add_instruction(Major::Push, Scope::NamedShared as u8, name);
            bco.add_instruction(Major::Indirect, IM_CALL, 2);
        }
        Ok(StatementResult::CompiledStatement)
    }

    /// `ReDim name(dims), ...`
    fn compile_redim(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        loop {
            let tok = self.source.tokenizer();
            if tok.current_token() != Token::Identifier {
                return Err(Error::expect_identifier("array name"));
            }
            let name = tok.current_string().to_owned();
            bco.add_variable_reference(Major::Push, &name, scc);
            self.source.tokenizer().read_next_token()?;

            if !self.source.tokenizer().check_advance(Token::LParen)? {
                return Err(Error::expect_symbol("("));
            }
            let mut dims: u16 = 0;
            loop {
                self.compile_argument_expression(bco, scc)?;
                dims += 1;
                let tok = self.source.tokenizer();
                if tok.check_advance(Token::RParen)? {
                    break;
                }
                if !tok.check_advance(Token::Comma)? {
                    return Err(Error::expect_symbol2(",", ")"));
                }
            }

            bco.add_instruction(Major::Special, SpecialOp::ResizeArray as u8, dims);
            if !parse_next(self.source.tokenizer())? {
                break;
            }
        }
        Ok(StatementResult::CompiledStatement)
    }

    /// `Return [value]`
    fn compile_return(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        scc.compile_cleanup(bco)?;

        if bco.is_procedure() {
            bco.add_instruction(Major::Special, SpecialOp::Return as u8, 0);
        } else {
            self.compile_argument_expression(bco, scc)?;
            bco.add_instruction(Major::Special, SpecialOp::Return as u8, 1);
        }

        self.parse_end_of_line()?;
        Ok(StatementResult::CompiledStatement)
    }

    /// `RunHook event`
    fn compile_run_hook(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        self.compile_name_string(bco, scc, "hook name")?;
        bco.add_instruction(Major::Special, SpecialOp::RunHook as u8, 0);
        self.parse_end_of_line()?;
        Ok(StatementResult::CompiledStatement)
    }

    /// `Select Case e / Case ... / EndSelect`
    fn compile_select(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        if !self.source.tokenizer().check_advance_keyword("CASE")? {
            return Err(Error::expect_keyword("Case"));
        }
        self.compile_argument_expression(bco, scc)?;
        self.parse_end_of_line()?;

        if scc.has_flag(CompilationFlag::RefuseBlocks) {
            return Err(Error::invalid_multiline());
        }

        // find the first case, skipping blank lines
        loop {
            self.source.read_next_line()?;
            if self.source.is_eof() {
                return Err(Error::new("Unexpected end of script"));
            }
            let tok = self.source.tokenizer();
            if tok.current_token() == Token::End {
                continue;
            }
            if tok.check_advance_keyword("ENDSELECT")? {
                self.parse_end_of_line()?;
                bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
                return Ok(StatementResult::CompiledBlock);
            }
            if tok.check_advance_keyword("CASE")? {
                break;
            }
            return Err(Error::expect_keyword("Case"));
        }

        // the selector stays on the stack; each taken branch drops it
        let block_scc = scc
            .derive()
            .block_syntax()
            .without_flag(CompilationFlag::LinearExecution);
        let lout = bco.make_label();
        loop {
            if self.source.tokenizer().check_advance_keyword("ELSE")? {
                self.parse_end_of_line()?;
                self.source.read_next_line()?;
                bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
                self.compile_list(bco, &block_scc)?;
                bco.add_jump(JUMP_ALWAYS, lout);
                if !self.source.tokenizer().check_advance_keyword("ENDSELECT")? {
                    return Err(Error::expect_keyword("EndSelect"));
                }
                break;
            }

            let ldo = bco.make_label();
            let ldont = bco.make_label();
            self.compile_select_condition(bco, scc, ldo)?;
            bco.add_jump(JUMP_ALWAYS, ldont);
            bco.add_label(ldo);
            bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
            self.compile_list(bco, &block_scc)?;
            bco.add_jump(JUMP_ALWAYS, lout);
            bco.add_label(ldont);
            if self.source.tokenizer().check_advance_keyword("ENDSELECT")? {
                break;
            }
            if !self.source.tokenizer().check_advance_keyword("CASE")? {
                return Err(Error::expect_keyword2("EndSelect", "Case"));
            }
        }
        self.parse_end_of_line()?;
        bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
        bco.add_label(lout);
        Ok(StatementResult::CompiledBlock)
    }

    /// One `Case` line: a comma list of values or `Is <relation> value`.
    fn compile_select_condition(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        ldo: Label,
    ) -> Result<(), Error> {
        loop {
            let mut relation = BinaryOp::CompareEqNc;
            if self.source.tokenizer().check_advance_keyword("IS")? {
                let tok = self.source.tokenizer();
                relation = if tok.check_advance(Token::Greater)? {
                    BinaryOp::CompareGtNc
                } else if tok.check_advance(Token::GreaterEqual)? {
                    BinaryOp::CompareGeNc
                } else if tok.check_advance(Token::Less)? {
                    BinaryOp::CompareLtNc
                } else if tok.check_advance(Token::LessEqual)? {
                    BinaryOp::CompareLeNc
                } else if tok.check_advance(Token::NotEqual)? {
                    BinaryOp::CompareNeNc
                } else if tok.check_advance(Token::Equal)? {
                    BinaryOp::CompareEqNc
                } else {
                    return Err(Error::new("Expecting relation"));
                };
            }
            bco.add_instruction(Major::Stack, StackOp::Dup as u8, 0);
            self.compile_argument_expression(bco, scc)?;
            bco.add_instruction(Major::Binary, relation as u8, 0);
            bco.add_jump(JUMP_IF_TRUE | JUMP_POP_ALWAYS, ldo);

            if !parse_next(self.source.tokenizer())? {
                return Ok(());
            }
        }
    }

    /// `SelectionExec [target :=] expr`
    fn compile_selection_exec(
        &mut self,
        bco: &mut BytecodeObject,
        _scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;

        let mut target: u16 = 0;
        let mut expr = Vec::new();
        selection::compile(self.source.tokenizer(), &mut expr)?;
        let tok = self.source.tokenizer();
        if tok.check_advance(Token::Assign)? || tok.check_advance(Token::Equal)? {
            if expr.len() != 1 {
                return Err(Error::not_assignable());
            }
            target = match expr[0] {
                selection::OP_CURRENT => 0,
                layer
                    if (selection::OP_FIRST_LAYER
                        ..selection::OP_FIRST_LAYER + selection::NUM_SELECTION_LAYERS)
                        .contains(&layer) =>
                {
                    u16::from(layer - selection::OP_FIRST_LAYER) + 1
                }
                _ => return Err(Error::not_assignable()),
            };
            expr.clear();
            selection::compile(self.source.tokenizer(), &mut expr)?;
        }
        self.parse_end_of_line()?;

        let expr_string = String::from_utf8(expr).expect("selection encoding is ASCII");
        bco.add_instruction(Major::Push, Scope::Integer as u8, target);
        bco.add_push_literal(&Value::str(expr_string));
        let name = bco.add_name("CC$SELECTIONEXEC");
        bco.add_instruction(Major::Push, Scope::NamedShared as u8, name);
        bco.add_instruction(Major::Indirect, IM_CALL | IM_REFUSE_FUNCTIONS, 2);
        Ok(StatementResult::CompiledStatement)
    }

    /// `Sub name(params)` / `Function name(params)` definitions.
    fn compile_sub(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        proc: bool,
        scope: Scope,
    ) -> Result<StatementResult, Error> {
        if scc.has_flag(CompilationFlag::RefuseBlocks) {
            return Err(Error::invalid_multiline());
        }

        self.source.tokenizer().read_next_token()?;
        let tok = self.source.tokenizer();
        if tok.current_token() != Token::Identifier {
            return Err(Error::expect_identifier(if proc {
                "subroutine name"
            } else {
                "function name"
            }));
        }
        let name = tok.current_string().to_owned();
        self.validate_name(&name)?;
        self.source.tokenizer().read_next_token()?;

        let mut nbco = BytecodeObject::new();
        nbco.set_is_procedure(proc);
        nbco.set_subroutine_name(&name);
        nbco.set_file_name(bco.file_name());
        nbco.set_origin(bco.origin());

        // parameter list
        let tok = self.source.tokenizer();
        if tok.check_advance(Token::LParen)? && !tok.check_advance(Token::RParen)? {
            let mut optional = false;
            loop {
                if tok.check_advance_keyword("OPTIONAL")? {
                    if optional {
                        return Err(Error::misplaced_keyword("Optional"));
                    }
                    optional = true;
                }
                if tok.current_token() != Token::Identifier {
                    return Err(Error::expect_identifier("parameter name"));
                }
                let param = tok.current_string().to_owned();
                if lookup_keyword(&param).is_some() {
                    return Err(Error::new(format!("\"{param}\" is a reserved name")));
                }
                tok.read_next_token()?;

                if tok.check_advance(Token::LParen)? {
                    // varargs: `rest()` must close both parens
                    if !tok.check_advance(Token::RParen)? || !tok.check_advance(Token::RParen)? {
                        return Err(Error::expect_symbol(")"));
                    }
                    nbco.add_local_variable(&param);
                    nbco.set_is_varargs(true);
                    break;
                }

                nbco.add_argument(&param, optional);
                if tok.check_advance(Token::RParen)? {
                    break;
                }
                if !tok.check_advance(Token::Comma)? {
                    return Err(Error::expect_symbol2(",", ")"));
                }
            }
        }
        self.parse_end_of_line()?;

        // the body compiles with a fresh compiler state so Option
        // directives inside stay inside
        self.source.read_next_line()?;
        let saved_options = (
            self.allow_local_types,
            self.allow_local_subs,
            self.optimisation_level,
        );
        let body_scc = StatementContext::new()
            .with_globals(self.world.globals_store())
            .block_syntax()
            .with_flag(CompilationFlag::LocalContext)
            .with_flag(CompilationFlag::LinearExecution);
        let body_result = self.compile_list(&mut nbco, &body_scc);
        (self.allow_local_types, self.allow_local_subs, self.optimisation_level) = saved_options;
        body_result?;

        // a function that runs off the end returns null
        if !proc {
            nbco.add_push_literal(&Value::Null);
        }
        self.finish_bco(&mut nbco)?;

        let terminator = if proc { "ENDSUB" } else { "ENDFUNCTION" };
        if !self.source.tokenizer().check_advance_keyword(terminator)? {
            return Err(Error::expect_keyword(if proc {
                "EndSub"
            } else {
                "EndFunction"
            }));
        }
        self.source.tokenizer().check_advance_keyword(&name)?;
        self.parse_end_of_line()?;

        self.compile_subroutine_definition(bco, scc, Rc::new(nbco), &name, scope);
        Ok(StatementResult::CompiledBlock)
    }

    /// `Struct name / fields / EndStruct`
    fn compile_struct(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        scope: Scope,
    ) -> Result<StatementResult, Error> {
        if scc.has_flag(CompilationFlag::RefuseBlocks) {
            return Err(Error::invalid_multiline());
        }

        self.source.tokenizer().read_next_token()?;
        let tok = self.source.tokenizer();
        if tok.current_token() != Token::Identifier {
            return Err(Error::expect_identifier("structure name"));
        }
        let name = tok.current_string().to_owned();
        self.validate_name(&name)?;
        if identify_type(&name) != TypeKeyword::None {
            return Err(Error::new(format!("\"{name}\" is a reserved type name")));
        }
        self.source.tokenizer().read_next_token()?;
        self.parse_end_of_line()?;

        // the structure type plus its constructor function
        let type_def = Rc::new(crate::types::StructureTypeDef::new());
        let mut ctor = BytecodeObject::new();
        ctor.set_is_procedure(false);
        ctor.set_file_name(bco.file_name());
        ctor.set_origin(bco.origin());
        ctor.set_subroutine_name(&name);
        ctor.add_line_number(self.source.line_number());
        ctor.add_push_literal(&Value::StructType(Rc::clone(&type_def)));
        ctor.add_instruction(Major::Special, SpecialOp::Instance as u8, 0);

        let field_scc = StatementContext::new()
            .with_globals(self.world.globals_store())
            .block_syntax()
            .with_flag(CompilationFlag::LocalContext)
            .with_flag(CompilationFlag::LinearExecution);

        let mut reading = true;
        while reading {
            self.source.read_next_line()?;
            if self.source.is_eof() {
                return Err(Error::new("Unexpected end of script"));
            }
            let tok = self.source.tokenizer();
            match tok.current_token() {
                Token::End => {}
                Token::Identifier => {
                    ctor.add_line_number(self.source.line_number());
                    let word = self.source.tokenizer().current_string().to_owned();
                    match lookup_keyword(&word) {
                        Some(Keyword::EndStruct) => {
                            self.source.tokenizer().read_next_token()?;
                            self.parse_end_of_line()?;
                            reading = false;
                        }
                        Some(_) => return Err(Error::misplaced_keyword(&word)),
                        None => loop {
                            let tok = self.source.tokenizer();
                            if tok.current_token() != Token::Identifier {
                                return Err(Error::expect_identifier("variable name"));
                            }
                            let field = tok.current_string().to_owned();
                            self.validate_name(&field)?;
                            if type_def.field_index(&field).is_some() {
                                return Err(Error::new("Duplicate field name"));
                            }
                            type_def.add_field(&field);
                            self.source.tokenizer().read_next_token()?;

                            if self.compile_initializer(&mut ctor, &field_scc)? {
                                ctor.add_instruction(Major::Stack, StackOp::Dup as u8, 1);
                                let index = ctor.add_name(&field);
                                ctor.add_instruction(Major::Memref, IM_POP, index);
                            }
                            if !parse_next(self.source.tokenizer())? {
                                break;
                            }
                        },
                    }
                }
                _ => return Err(Error::new("Invalid structure definition")),
            }
        }

        ctor.add_instruction(Major::Special, SpecialOp::Return as u8, 1);
        self.finish_bco(&mut ctor)?;

        self.compile_subroutine_definition(bco, scc, Rc::new(ctor), &name, scope);
        Ok(StatementResult::CompiledBlock)
    }

    /// `Try body [Else body] EndTry` and the one-line form.
    fn compile_try(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let lcatch = bco.make_label();
        let lend = bco.make_label();

        bco.add_jump(JUMP_CATCH, lcatch);

        let block = BlockContext {
            kind: BlockKind::Try,
            parent: scc.block(),
        };
        let try_scc = scc
            .derive()
            .without_flag(CompilationFlag::LinearExecution)
            .with_block(&block);

        if self.source.tokenizer().read_next_token()? == Token::End {
            validate_multiline(scc)?;
            self.source.read_next_line()?;
            self.compile_list(bco, &try_scc.derive().block_syntax())?;
            bco.add_instruction(Major::Special, SpecialOp::Uncatch as u8, 0);
            bco.add_jump(JUMP_ALWAYS, lend);
            bco.add_label(lcatch);
            bco.add_variable_reference(Major::Pop, "SYSTEM.ERR", scc);
            if self.source.tokenizer().check_advance_keyword("ELSE")? {
                self.parse_end_of_line()?;
                self.source.read_next_line()?;
                self.compile_list(bco, &scc.derive().block_syntax())?;
            }
            bco.add_label(lend);
            if !self.source.tokenizer().check_advance_keyword("ENDTRY")? {
                return Err(Error::expect_keyword("EndTry"));
            }
            self.parse_end_of_line()?;
            Ok(StatementResult::CompiledBlock)
        } else {
            self.compile(bco, &try_scc.derive().one_line_syntax())?;
            bco.add_instruction(Major::Special, SpecialOp::Uncatch as u8, 0);
            bco.add_jump(JUMP_ALWAYS, lend);
            bco.add_label(lcatch);
            bco.add_variable_reference(Major::Pop, "SYSTEM.ERR", scc);
            bco.add_label(lend);
            Ok(StatementResult::CompiledStatement)
        }
    }

    /// `UseKeymap name`
    fn compile_use_keymap(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;
        self.compile_name_string(bco, scc, "keymap name")?;
        bco.add_instruction(Major::Unary, UnaryOp::KeyLookup as u8, 0);

        bco.add_variable_reference(Major::Push, "UI.PREFIX", scc);

        let name = bco.add_name("CC$USEKEYMAP");
        bco.add_instruction(Major::Push, Scope::NamedShared as u8, name);
        bco.add_instruction(Major::Indirect, IM_CALL, 2);

        self.parse_end_of_line()?;
        Ok(StatementResult::CompiledStatement)
    }

    /// `With obj [Do] body [EndWith]`
    fn compile_with(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        self.source.tokenizer().read_next_token()?;

        self.compile_argument_expression(bco, scc)?;
        bco.add_instruction(Major::Special, SpecialOp::With as u8, 0);

        let block = BlockContext {
            kind: BlockKind::With,
            parent: scc.block(),
        };
        let with_scc = scc
            .derive()
            .without_flag(CompilationFlag::LocalContext)
            .with_static_context(None)
            .with_block(&block);

        let oneliner = self.source.tokenizer().check_advance_keyword("DO")?;
        if self.source.tokenizer().current_token() == Token::End {
            validate_multiline(scc)?;
            self.source.read_next_line()?;
            self.compile_list(bco, &with_scc.block_syntax())?;
            if !self.source.tokenizer().check_advance_keyword("ENDWITH")? {
                return Err(Error::expect_keyword("EndWith"));
            }
            self.parse_end_of_line()?;
            bco.add_instruction(Major::Special, SpecialOp::EndWith as u8, 0);
            Ok(StatementResult::CompiledBlock)
        } else {
            if !oneliner {
                return Err(Error::expect_keyword("Do"));
            }
            self.compile(bco, &with_scc.one_line_syntax())?;
            bco.add_instruction(Major::Special, SpecialOp::EndWith as u8, 0);
            Ok(StatementResult::CompiledStatement)
        }
    }

    /* ---------------- shared helpers ---------------- */

    /// Loop bodies after `For`/`ForEach` heads: one line after `Do`, or a
    /// block ended by `Next`.
    fn compile_loop_body(
        &mut self,
        bco: &mut BytecodeObject,
        subcc: &StatementContext<'_>,
    ) -> Result<StatementResult, Error> {
        let oneliner = self.source.tokenizer().check_advance_keyword("DO")?;
        if self.source.tokenizer().current_token() != Token::End {
            if !oneliner {
                return Err(Error::expect_keyword("Do"));
            }
            self.compile(bco, &subcc.derive().one_line_syntax())?;
            Ok(StatementResult::CompiledStatement)
        } else {
            validate_multiline(subcc)?;
            self.source.read_next_line()?;
            self.compile_list(bco, &subcc.derive().block_syntax())?;
            if !self.source.tokenizer().check_advance_keyword("NEXT")? {
                return Err(Error::expect_keyword("Next"));
            }
            self.parse_end_of_line()?;
            Ok(StatementResult::CompiledBlock)
        }
    }

    /// A comma list of `name [initializer]` definitions.
    fn compile_variable_definition(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        scope: Scope,
    ) -> Result<(), Error> {
        loop {
            let tok = self.source.tokenizer();
            if tok.current_token() != Token::Identifier {
                return Err(Error::expect_identifier("variable name"));
            }
            let mut name = tok.current_string().to_owned();
            if scope == Scope::Shared {
                name = strip_prefix(&name, "GLOBAL.")?;
            }
            self.validate_name(&name)?;
            self.source.tokenizer().read_next_token()?;

            let has_initializer = self.compile_initializer(bco, scc)?;

            // When execution is linear and nothing can have touched the
            // symbol table, a local can be pre-allocated so later
            // references address it by slot.
            if self.optimisation_level >= 0
                && scope == Scope::Local
                && scc.has_flag(CompilationFlag::LinearExecution)
                && scc.has_flag(CompilationFlag::LocalContext)
                && !bco.has_name(&name)
                && !bco.has_user_call()
            {
                if bco.has_local_variable(&name) {
                    if has_initializer {
                        bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
                    }
                    let mut warning =
                        Error::new(format!("Duplicate local variable name '{name}'"));
                    self.source.add_trace_to(&mut warning);
                    self.world.log_warning(&warning);
                } else {
                    bco.add_local_variable(&name);
                    if has_initializer {
                        bco.add_variable_reference(Major::Pop, &name, scc);
                    }
                }
            } else {
                if !has_initializer {
                    bco.add_push_literal(&Value::Null);
                }
                let index = bco.add_name(&name);
                bco.add_instruction(Major::Dim, scope as u8, index);
            }

            if !parse_next(self.source.tokenizer())? {
                return Ok(());
            }
        }
    }

    /// Optional initializer after a variable or field name. Returns true
    /// when code producing an initial value was emitted.
    fn compile_initializer(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<bool, Error> {
        let tok = self.source.tokenizer();
        if tok.check_advance(Token::LParen)? {
            // array dimensions
            let mut n: u16 = 0;
            loop {
                self.compile_argument_expression(bco, scc)?;
                n += 1;
                let tok = self.source.tokenizer();
                if tok.check_advance(Token::RParen)? {
                    break;
                }
                if !tok.check_advance(Token::Comma)? {
                    return Err(Error::expect_symbol2(",", ")"));
                }
            }
            bco.add_instruction(Major::Special, SpecialOp::NewArray as u8, n);
            if self.source.tokenizer().check_advance_keyword("AS")? {
                let tok = self.source.tokenizer();
                if tok.current_token() != Token::Identifier {
                    return Err(Error::expect_identifier("type name"));
                }
                let type_name = tok.current_string().to_owned();
                tok.read_next_token()?;
                if identify_type(&type_name) != TypeKeyword::Any {
                    self.compile_array_initializer_loop(bco, scc, n, &type_name)?;
                }
            }
            Ok(true)
        } else if tok.check_advance(Token::Equal)? || tok.check_advance(Token::Assign)? {
            self.compile_argument_expression(bco, scc)?;
            Ok(true)
        } else if tok.check_advance_keyword("AS")? {
            let tok = self.source.tokenizer();
            if tok.current_token() != Token::Identifier {
                return Err(Error::expect_identifier("type name"));
            }
            let type_name = tok.current_string().to_owned();
            tok.read_next_token()?;
            self.compile_type_initializer(bco, scc, &type_name)
        } else {
            Ok(false)
        }
    }

    /// Fills a freshly allocated array with typed initial values.
    ///
    /// Iterates every dimension from its high end so the array is only
    /// resized once.
    fn compile_array_initializer_loop(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        n: u16,
        type_name: &str,
    ) -> Result<(), Error> {
        let n_us = usize::from(n);
        let mut label_skip = Vec::with_capacity(n_us);
        let mut label_loop = Vec::with_capacity(n_us);
        for _ in 0..n {
            label_skip.push(bco.make_label());
            label_loop.push(bco.make_label());
        }

        // loop heads, outermost dimension first
        for i in 0..n_us {
            bco.add_instruction(Major::Stack, StackOp::Dup as u8, i as u16);
            bco.add_instruction(Major::Push, Scope::Integer as u8, n - i as u16);
            bco.add_instruction(Major::Binary, BinaryOp::ArrayDim as u8, 0);
            bco.add_jump(JUMP_IF_FALSE | JUMP_IF_EMPTY, label_skip[n_us - 1 - i]);
            bco.add_label(label_loop[n_us - 1 - i]);
            bco.add_instruction(Major::Unary, UnaryOp::Dec as u8, 0);
        }

        // body: reload the indexes, produce one value, store it
        for i in 0..n_us {
            bco.add_instruction(Major::Stack, StackOp::Dup as u8, (2 * i) as u16);
        }
        if !self.compile_type_initializer(bco, scc, type_name)? {
            // cannot happen, `Any` was filtered out by the caller
            bco.add_push_literal(&Value::Null);
        }
        bco.add_instruction(Major::Stack, StackOp::Dup as u8, 2 * n + 1);
        bco.add_instruction(Major::Indirect, IM_POP, n);

        // loop tails, innermost dimension first
        for i in 0..n_us {
            bco.add_jump(JUMP_IF_TRUE, label_loop[i]);
            bco.add_label(label_skip[i]);
            bco.add_instruction(Major::Stack, StackOp::Drop as u8, 1);
        }
        Ok(())
    }

    /// Pushes the default value of a type name; false for `Any` which
    /// stays null.
    fn compile_type_initializer(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        type_name: &str,
    ) -> Result<bool, Error> {
        match identify_type(type_name) {
            TypeKeyword::None => {
                // user-defined type: call its constructor
                if self.allow_local_types {
                    bco.add_variable_reference(Major::Push, type_name, scc);
                } else {
                    let index = bco.add_name(type_name);
                    bco.add_instruction(Major::Push, Scope::NamedShared as u8, index);
                }
                bco.add_instruction(Major::Indirect, IM_LOAD, 0);
                Ok(true)
            }
            TypeKeyword::Any => Ok(false),
            TypeKeyword::Integer => {
                bco.add_instruction(Major::Push, Scope::Integer as u8, 0);
                Ok(true)
            }
            TypeKeyword::Float => {
                bco.add_push_literal(&Value::Float(0.0));
                Ok(true)
            }
            TypeKeyword::String => {
                bco.add_push_literal(&Value::str(""));
                Ok(true)
            }
            TypeKeyword::Hash => {
                bco.add_instruction(Major::Special, SpecialOp::NewHash as u8, 0);
                Ok(true)
            }
        }
    }

    /// One expression compiled for its value.
    fn compile_argument_expression(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
    ) -> Result<(), Error> {
        let node = Parser::new(self.source.tokenizer()).parse()?;
        node.compile_value(bco, scc)
    }

    /// One expression compiled as a yes/no decision.
    fn compile_argument_condition(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        ift: Label,
        iff: Label,
    ) -> Result<(), Error> {
        let node = Parser::new(self.source.tokenizer()).parse()?;
        node.compile_condition(bco, scc, ift, iff)
    }

    /// A keymap or hook name: a bare identifier, or `ByName(expr)`.
    fn compile_name_string(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        what: &str,
    ) -> Result<(), Error> {
        let tok = self.source.tokenizer();
        if tok.current_token() != Token::Identifier {
            return Err(Error::expect_identifier(what));
        }
        let name = tok.current_string().to_owned();
        tok.read_next_token()?;
        if tok.current_token() == Token::LParen && name == "BYNAME" {
            tok.read_next_token()?;
            let node = Parser::new(self.source.tokenizer()).parse()?;
            if !self.source.tokenizer().check_advance(Token::RParen)? {
                return Err(Error::expect_symbol(")"));
            }
            node.compile_value(bco, scc)?;
            bco.add_instruction(Major::Unary, UnaryOp::UCase as u8, 0);
        } else {
            bco.add_push_literal(&Value::str(name));
        }
        Ok(())
    }

    /// Emits the definition of a compiled subroutine under `name`.
    fn compile_subroutine_definition(
        &mut self,
        bco: &mut BytecodeObject,
        scc: &StatementContext<'_>,
        sub: crate::value::BcoRef,
        name: &str,
        scope: Scope,
    ) {
        bco.add_push_literal(&Value::subroutine(sub));

        if self.optimisation_level >= 0
            && scope == Scope::Local
            && scc.has_flag(CompilationFlag::LinearExecution)
            && scc.has_flag(CompilationFlag::LocalContext)
            && !bco.has_name(name)
            && !bco.has_user_call()
        {
            // the symbol table is fully under our control up to here
            if !bco.has_local_variable(name) {
                bco.add_local_variable(name);
            }
            bco.add_variable_reference(Major::Pop, name, scc);
        } else if scope == Scope::Local || scope == Scope::Static {
            // make sure the name exists in the target scope, then store
            // through the regular name search
            bco.add_push_literal(&Value::Null);
            let index = bco.add_name(name);
            bco.add_instruction(Major::Dim, scope as u8, index);
            let index = bco.add_name(name);
            bco.add_instruction(Major::Pop, Scope::NamedVariable as u8, index);
        } else {
            let index = bco.add_name(name);
            bco.add_instruction(Major::Special, SpecialOp::DefSub as u8, index);
        }
    }

    /// Line must end here.
    fn parse_end_of_line(&mut self) -> Result<(), Error> {
        if self.source.tokenizer().current_token() != Token::End {
            return Err(Error::garbage_at_end(false));
        }
        Ok(())
    }

    /// Keywords and special commands cannot be variable names.
    fn validate_name(&self, name: &str) -> Result<(), Error> {
        if lookup_keyword(name).is_some() || self.world.lookup_special_command(name).is_some() {
            return Err(Error::new(format!("\"{name}\" is a reserved name")));
        }
        Ok(())
    }
}

/// Type keywords accepted in `As type` initializers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeKeyword {
    None,
    Any,
    Integer,
    Float,
    String,
    Hash,
}

fn identify_type(name: &str) -> TypeKeyword {
    match name {
        "ANY" => TypeKeyword::Any,
        "INTEGER" | "LONG" => TypeKeyword::Integer,
        "FLOAT" | "SINGLE" | "DOUBLE" => TypeKeyword::Float,
        "STRING" => TypeKeyword::String,
        "HASH" => TypeKeyword::Hash,
        _ => TypeKeyword::None,
    }
}

/// Strips a scope prefix such as `SHIP.` from an identifier.
fn strip_prefix(name: &str, prefix: &str) -> Result<String, Error> {
    match name.strip_prefix(prefix) {
        // `SHIP.` alone tokenizes as `SHIP` + `.`, so this cannot be empty
        Some("") => Err(Error::new("Invalid identifier")),
        Some(rest) => Ok(rest.to_owned()),
        None => Ok(name.to_owned()),
    }
}

/// Refuses block statements in one-line contexts.
fn validate_multiline(scc: &StatementContext<'_>) -> Result<(), Error> {
    if scc.has_flag(CompilationFlag::RefuseBlocks) {
        Err(Error::invalid_multiline())
    } else {
        Ok(())
    }
}

/// Checks for a further comma-separated element.
fn parse_next(tok: &mut Tokenizer) -> Result<bool, Error> {
    if tok.check_advance(Token::Comma)? {
        Ok(true)
    } else if tok.current_token() == Token::End {
        Ok(false)
    } else {
        Err(Error::expect_symbol(","))
    }
}

/// Parses the comma-separated argument list of a command, up to the end
/// of the line.
pub fn parse_command_argument_list(tok: &mut Tokenizer) -> Result<Vec<Node>, Error> {
    let mut args = Vec::new();
    if tok.current_token() != Token::End {
        loop {
            args.push(Parser::new(tok).parse()?);
            if !parse_next(tok)? {
                break;
            }
        }
    }
    Ok(args)
}

/// `Option` arguments: absent means 1, otherwise `(n)` with optional
/// sign, range checked.
fn parse_option_argument(tok: &mut Tokenizer, min: i32, max: i32) -> Result<i32, Error> {
    if tok.check_advance(Token::LParen)? {
        let negate = if tok.check_advance(Token::Plus)? {
            false
        } else {
            tok.check_advance(Token::Minus)?
        };
        if tok.current_token() != Token::Integer && tok.current_token() != Token::Boolean {
            return Err(Error::new("Expecting integer"));
        }
        let mut value = tok.current_integer();
        if negate {
            value = -value;
        }
        if value < min || value > max {
            return Err(Error::range_error());
        }
        tok.read_next_token()?;
        if !tok.check_advance(Token::RParen)? {
            return Err(Error::expect_symbol(")"));
        }
        Ok(value)
    } else {
        Ok(1)
    }
}

fn arg_count(args: &[Node]) -> Result<u16, Error> {
    u16::try_from(args.len()).map_err(|_| Error::new("Too many arguments"))
}
