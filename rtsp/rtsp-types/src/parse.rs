//! Parsing utilities shared by the typed headers and message parsers

use nom::IResult as NomIResult;
use nom::bytes::complete::{escaped, is_not, take_while};
use nom::character::complete::char;
use nom::error::{ParseError, VerboseError};
use nom::sequence::delimited;
use nom::{InputIter, InputLength, InputTakeAtPosition};

pub type IResult<I, O> = NomIResult<I, O, VerboseError<I>>;

pub use nom::Finish;

pub fn verbose_error_to_owned(i: VerboseError<&str>) -> VerboseError<String> {
    VerboseError {
        errors: i
            .errors
            .into_iter()
            .map(|(i, kind)| (i.into(), kind))
            .collect(),
    }
}

/// Parse a `"`-delimited quoted string, returning the content without quotes
pub fn parse_quoted(i: &str) -> IResult<&str, &str> {
    delimited(char('"'), escaped(is_not("\"\\"), '\\', char('"')), char('"'))(i)
}

pub fn whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// RTSP token characters, shared by methods, header names and parameter keys
#[rustfmt::skip]
pub fn token(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '.' | '!' | '%' | '*' | '_' | '`' | '\'' | '~' | '+' | '$')
}

pub trait WsTuple<I, O, E> {
    fn parse(&mut self, i: I) -> NomIResult<I, O, E>;
}

/// Take a list of parsers and insert a take_while(whitespace) before each
#[inline]
pub fn ws<I, O, E, L>(mut l: L) -> impl FnMut(I) -> NomIResult<I, O, E>
where
    I: InputLength + InputIter + InputTakeAtPosition,
    <I as InputTakeAtPosition>::Item: Into<char>,
    E: ParseError<I>,
    L: WsTuple<I, O, E>,
{
    move |i: I| l.parse(i)
}

fn is_ws(c: impl Into<char>) -> bool {
    c.into().is_ascii_whitespace()
}

macro_rules! ws_impl {
    (
        $gen:ident $gen_fn:ident;
        $($r_gen:ident $r_gen_fn:ident;)*
    ) => {
        ws_impl!(
            @impl_
            $gen $gen_fn;
            $($r_gen $r_gen_fn;)*
        );

        ws_impl!(
            $($r_gen $r_gen_fn;)*
        );
    };
    (@impl_ $($gen:ident $gen_fn:ident;)+) => {
        impl<
            $($gen,)*
            Input: InputLength + InputIter + InputTakeAtPosition,
            Error: ParseError<Input>,
            $(
                $gen_fn: FnMut(Input) -> NomIResult<Input, $gen, Error>,
            )*
            >
            WsTuple<Input, ($($gen,)*), Error> for ($($gen_fn,)*)
            where
                <Input as InputTakeAtPosition>::Item: Into<char>,
            {
                #[allow(non_snake_case)]
                fn parse(&mut self, input: Input) -> NomIResult<Input, ( $($gen,)* ), Error> {
                    let ($($gen_fn,)*) = self;

                    $(
                    let (input, _) = take_while(is_ws)(input)?;
                    let (input, $gen) = ($gen_fn)(input)?;
                    )*

                    Ok((input, ($($gen,)*)))
                }
            }
    };
    () => {}
}

ws_impl! {
    A FnA;
    B FnB;
    C FnC;
    D FnD;
    E FnE;
    F FnF;
    G FnG;
    H FnH;
}
