#[derive(
    Debug, Clone, PartialEq, strum::EnumString, strum::Display, strum::EnumIter, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    If,
    Else,
    While,
    Switch,
    Case,
    Default,
    Func,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_keyword_round_trip() {
        for kw in Keyword::iter() {
            assert_eq!(kw.to_string().parse::<Keyword>().unwrap(), kw);
        }
        assert!("If".parse::<Keyword>().is_err());
    }
}
