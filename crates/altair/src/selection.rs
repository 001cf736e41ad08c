//! Selection-algebra expressions.
//!
//! `SelectionExec` takes a compact expression over selection layers and
//! object sets. The compiler translates it into a postfix byte string
//! which the host's selection manager interprets; the language core only
//! defines the encoding and the surface grammar.
//!
//! Postfix encoding, one byte per element:
//! operands `c` (current layer), `A`..`H` (named layers), `s` (all
//! ships), `p` (all planets), `0`, `1`; operators `&`, `|`, `^`, `!`.

use crate::{
    error::Error,
    tokenizer::{Token, Tokenizer},
};

/// Number of named selection layers (`A` through `H`).
pub const NUM_SELECTION_LAYERS: u8 = 8;
/// Operand: the current selection layer.
pub const OP_CURRENT: u8 = b'c';
/// Operand: first named layer; `OP_FIRST_LAYER + n` is layer n.
pub const OP_FIRST_LAYER: u8 = b'A';
/// Operand: all ships.
pub const OP_SHIPS: u8 = b's';
/// Operand: all planets.
pub const OP_PLANETS: u8 = b'p';
/// Operand: nothing selected.
pub const OP_ZERO: u8 = b'0';
/// Operand: everything selected.
pub const OP_ONE: u8 = b'1';
/// Operator: intersection.
pub const OP_AND: u8 = b'&';
/// Operator: union.
pub const OP_OR: u8 = b'|';
/// Operator: symmetric difference.
pub const OP_XOR: u8 = b'^';
/// Operator: complement.
pub const OP_NOT: u8 = b'!';

/// Compiles one selection expression from the tokenizer into `out`.
pub fn compile(tok: &mut Tokenizer, out: &mut Vec<u8>) -> Result<(), Error> {
    parse_or(tok, out)
}

fn parse_or(tok: &mut Tokenizer, out: &mut Vec<u8>) -> Result<(), Error> {
    parse_and(tok, out)?;
    loop {
        if tok.check_advance(Token::Plus)? || tok.check_advance(Token::Or)? {
            parse_and(tok, out)?;
            out.push(OP_OR);
        } else if tok.check_advance(Token::Minus)? {
            // difference: a - b == a & !b
            parse_and(tok, out)?;
            out.push(OP_NOT);
            out.push(OP_AND);
        } else if tok.check_advance(Token::Xor)? {
            parse_and(tok, out)?;
            out.push(OP_XOR);
        } else {
            return Ok(());
        }
    }
}

fn parse_and(tok: &mut Tokenizer, out: &mut Vec<u8>) -> Result<(), Error> {
    parse_not(tok, out)?;
    while tok.check_advance(Token::Multiply)?
        || tok.check_advance(Token::Ampersand)?
        || tok.check_advance(Token::And)?
    {
        parse_not(tok, out)?;
        out.push(OP_AND);
    }
    Ok(())
}

fn parse_not(tok: &mut Tokenizer, out: &mut Vec<u8>) -> Result<(), Error> {
    if tok.check_advance(Token::Not)? {
        parse_not(tok, out)?;
        out.push(OP_NOT);
        Ok(())
    } else {
        parse_primary(tok, out)
    }
}

fn parse_primary(tok: &mut Tokenizer, out: &mut Vec<u8>) -> Result<(), Error> {
    match tok.current_token() {
        Token::LParen => {
            tok.read_next_token()?;
            parse_or(tok, out)?;
            if !tok.check_advance(Token::RParen)? {
                return Err(Error::expect_symbol(")"));
            }
            Ok(())
        }
        Token::Integer if tok.current_integer() == 0 => {
            tok.read_next_token()?;
            out.push(OP_ZERO);
            Ok(())
        }
        Token::Integer if tok.current_integer() == 1 => {
            tok.read_next_token()?;
            out.push(OP_ONE);
            Ok(())
        }
        Token::Identifier => {
            let name = tok.current_string().to_owned();
            let op = match name.as_str() {
                "CURRENT" => OP_CURRENT,
                "SHIPS" | "S" => OP_SHIPS,
                "PLANETS" | "P" => OP_PLANETS,
                layer if layer.len() == 1 => {
                    let b = layer.as_bytes()[0];
                    if (OP_FIRST_LAYER..OP_FIRST_LAYER + NUM_SELECTION_LAYERS).contains(&b) {
                        b
                    } else {
                        return Err(Error::new("Invalid selection expression"));
                    }
                }
                _ => return Err(Error::new("Invalid selection expression")),
            };
            tok.read_next_token()?;
            out.push(op);
            Ok(())
        }
        _ => Err(Error::new("Invalid selection expression")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_str(text: &str) -> Result<Vec<u8>, Error> {
        let mut tok = Tokenizer::new(text)?;
        let mut out = Vec::new();
        compile(&mut tok, &mut out)?;
        if tok.current_token() != Token::End {
            return Err(Error::garbage_at_end(false));
        }
        Ok(out)
    }

    #[test]
    fn test_operands() {
        assert_eq!(compile_str("Current").unwrap(), b"c");
        assert_eq!(compile_str("A").unwrap(), b"A");
        assert_eq!(compile_str("H").unwrap(), b"H");
        assert_eq!(compile_str("Ships").unwrap(), b"s");
        assert_eq!(compile_str("1").unwrap(), b"1");
        assert!(compile_str("I").is_err());
    }

    #[test]
    fn test_operators_postfix() {
        assert_eq!(compile_str("A + B").unwrap(), b"AB|");
        assert_eq!(compile_str("A - B").unwrap(), b"AB!&");
        assert_eq!(compile_str("A * (B + Current)").unwrap(), b"ABc|&");
        assert_eq!(compile_str("Not A").unwrap(), b"A!");
        assert_eq!(compile_str("A Xor B").unwrap(), b"AB^");
    }
}
