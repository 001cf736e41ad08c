//! Statement keyword table.

/// Statement keywords recognized in first position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Abort,
    Bind,
    Break,
    Call,
    Case,
    Continue,
    CreateKeymap,
    CreatePlanetProperty,
    CreateShipProperty,
    Dim,
    Do,
    Else,
    End,
    EndFunction,
    EndIf,
    EndOn,
    EndSelect,
    EndStruct,
    EndSub,
    EndTry,
    EndWith,
    Eval,
    For,
    ForEach,
    Function,
    If,
    Load,
    Local,
    Loop,
    Next,
    On,
    Option,
    Print,
    ReDim,
    Restart,
    Return,
    RunHook,
    Select,
    SelectionExec,
    Shared,
    Static,
    Stop,
    Struct,
    Sub,
    Try,
    TryLoad,
    Until,
    UseKeymap,
    While,
    With,
}

/// Looks up a statement keyword. `name` must be upper-case (the
/// tokenizer upcases identifiers).
#[must_use]
pub fn lookup_keyword(name: &str) -> Option<Keyword> {
    use Keyword as K;
    let kw = match name {
        "ABORT" => K::Abort,
        "BIND" => K::Bind,
        "BREAK" => K::Break,
        "CALL" => K::Call,
        "CASE" => K::Case,
        "CONTINUE" => K::Continue,
        "CREATEKEYMAP" => K::CreateKeymap,
        "CREATEPLANETPROPERTY" => K::CreatePlanetProperty,
        "CREATESHIPPROPERTY" => K::CreateShipProperty,
        "DIM" => K::Dim,
        "DO" => K::Do,
        "ELSE" => K::Else,
        "END" => K::End,
        "ENDFUNCTION" => K::EndFunction,
        "ENDIF" => K::EndIf,
        "ENDON" => K::EndOn,
        "ENDSELECT" => K::EndSelect,
        "ENDSTRUCT" => K::EndStruct,
        "ENDSUB" => K::EndSub,
        "ENDTRY" => K::EndTry,
        "ENDWITH" => K::EndWith,
        "EVAL" => K::Eval,
        "FOR" => K::For,
        "FOREACH" => K::ForEach,
        "FUNCTION" => K::Function,
        "IF" => K::If,
        "LOAD" => K::Load,
        "LOCAL" => K::Local,
        "LOOP" => K::Loop,
        "NEXT" => K::Next,
        "ON" => K::On,
        "OPTION" => K::Option,
        "PRINT" => K::Print,
        "REDIM" => K::ReDim,
        "RESTART" => K::Restart,
        "RETURN" => K::Return,
        "RUNHOOK" => K::RunHook,
        "SELECT" => K::Select,
        "SELECTIONEXEC" => K::SelectionExec,
        "SHARED" => K::Shared,
        "STATIC" => K::Static,
        "STOP" => K::Stop,
        "STRUCT" => K::Struct,
        "SUB" => K::Sub,
        "TRY" => K::Try,
        "TRYLOAD" => K::TryLoad,
        "UNTIL" => K::Until,
        "USEKEYMAP" => K::UseKeymap,
        "WHILE" => K::While,
        "WITH" => K::With,
        _ => return None,
    };
    Some(kw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup_keyword("FOREACH"), Some(Keyword::ForEach));
        assert_eq!(lookup_keyword("SETSPEED"), None);
        // lookup expects canonical upper case
        assert_eq!(lookup_keyword("foreach"), None);
    }
}
