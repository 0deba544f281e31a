pub mod error;
pub mod lexer;
pub mod token;

pub use error::{LexError, LexResult};
pub use lexer::Lexer;
pub use token::{lookup_keyword, Span, Token, TokenKind};

pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexError>) {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize();
    (tokens, lexer.errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, errors) = tokenize(src);
        assert!(errors.is_empty(), "Unexpected errors: {:?}", errors);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_source() {
        let (tokens, errors) = tokenize("");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_integer_literals() {
        let k = kinds("42 1_000_000");
        assert_eq!(k[0], TokenKind::IntLiteral(42));
        assert_eq!(k[1], TokenKind::IntLiteral(1_000_000));
    }

    #[test]
    fn test_float_literals() {
        let k = kinds("3.14 0.5");
        assert_eq!(k[0], TokenKind::FloatLiteral(3.14));
        assert_eq!(k[1], TokenKind::FloatLiteral(0.5));
    }

    #[test]
    fn test_string_literal() {
        let (tokens, errors) = tokenize(r#""hello world""#);
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral("hello world".to_string()));
    }

    #[test]
    fn test_bool_and_null() {
        let k = kinds("true false null");
        assert_eq!(k[0], TokenKind::BoolLiteral(true));
        assert_eq!(k[1], TokenKind::BoolLiteral(false));
        assert_eq!(k[2], TokenKind::NullLiteral);
    }

    #[test]
    fn test_keywords() {
        let k = kinds("var const ref fn class if else while return include");
        assert_eq!(k[0], TokenKind::Var);
        assert_eq!(k[1], TokenKind::Const);
        assert_eq!(k[2], TokenKind::Ref);
        assert_eq!(k[3], TokenKind::Fn);
        assert_eq!(k[4], TokenKind::Class);
        assert_eq!(k[5], TokenKind::If);
        assert_eq!(k[6], TokenKind::Else);
        assert_eq!(k[7], TokenKind::While);
        assert_eq!(k[8], TokenKind::Return);
        assert_eq!(k[9], TokenKind::Include);
    }

    #[test]
    fn test_operators() {
        let k = kinds("+ - * / ** == != <= >= << >> && || !");
        assert_eq!(k[0], TokenKind::Plus);
        assert_eq!(k[1], TokenKind::Minus);
        assert_eq!(k[2], TokenKind::Star);
        assert_eq!(k[3], TokenKind::Slash);
        assert_eq!(k[4], TokenKind::StarStar);
        assert_eq!(k[5], TokenKind::EqualEqual);
        assert_eq!(k[6], TokenKind::BangEqual);
        assert_eq!(k[7], TokenKind::LessEqual);
        assert_eq!(k[8], TokenKind::GreaterEqual);
        assert_eq!(k[9], TokenKind::LessLess);
        assert_eq!(k[10], TokenKind::GreaterGreater);
        assert_eq!(k[11], TokenKind::AmpersandAmpersand);
        assert_eq!(k[12], TokenKind::PipePipe);
        assert_eq!(k[13], TokenKind::Bang);
    }

    #[test]
    fn test_identifiers() {
        let k = kinds("foo bar_baz _private MyClass");
        assert_eq!(k[0], TokenKind::Identifier("foo".to_string()));
        assert_eq!(k[1], TokenKind::Identifier("bar_baz".to_string()));
        assert_eq!(k[2], TokenKind::Identifier("_private".to_string()));
        assert_eq!(k[3], TokenKind::Identifier("MyClass".to_string()));
    }

    #[test]
    fn test_line_comment_skipped() {
        let k = kinds("var x = 1 // comment\nx");
        assert_eq!(k[0], TokenKind::Var);
        assert!(!k.iter().any(|t| matches!(t, TokenKind::Unknown(_))));
    }

    #[test]
    fn test_block_comment_skipped() {
        let k = kinds("var /* skip\nme */ x = 1");
        assert_eq!(k[0], TokenKind::Var);
        assert_eq!(k[1], TokenKind::Identifier("x".to_string()));
    }

    #[test]
    fn test_escape_sequences() {
        let (tokens, errors) = tokenize(r#""\n\t\\""#);
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral("\n\t\\".to_string()));
    }

    #[test]
    fn test_unterminated_string_error() {
        let (_tokens, errors) = tokenize("\"hello");
        assert!(!errors.is_empty());
        assert!(matches!(errors[0], LexError::UnterminatedString { .. }));
    }

    #[test]
    fn test_unclosed_block_comment_error() {
        let (_tokens, errors) = tokenize("var x /* never closed");
        assert!(!errors.is_empty());
        assert!(matches!(errors[0], LexError::UnclosedBlockComment { .. }));
    }

    #[test]
    fn test_semicolon_token() {
        let k = kinds("x = 1; y = 2");
        assert_eq!(k[2], TokenKind::Semicolon);
    }

    #[test]
    fn test_field_and_subscript_tokens() {
        let k = kinds("o.x o[i]");
        assert_eq!(k[0], TokenKind::Identifier("o".to_string()));
        assert_eq!(k[1], TokenKind::Dot);
        assert_eq!(k[2], TokenKind::Identifier("x".to_string()));
        assert_eq!(k[3], TokenKind::Identifier("o".to_string()));
        assert_eq!(k[4], TokenKind::LBracket);
    }
}
