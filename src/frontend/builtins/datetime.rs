use chrono::{DateTime, Datelike, Duration, FixedOffset, SecondsFormat, Timelike, Utc};
use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::Value;

use super::str_arg;

/// Current UTC time in RFC3339 format
pub fn create_timestamp_func() -> FuncDef {
    FuncDef::builder().build(|_: FuncArgs| {
        Ok(Value::from(
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
    })
}

/// `timeadd(timestamp, duration)` where duration is a sequence such as
/// `1h30m` or `-10s`.
pub fn create_timeadd_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let dt = DateTime::parse_from_rfc3339(str_arg(&args, 0)?)
                .map_err(|e| e.to_string())?
                .with_timezone(&Utc);
            let dur = parse_duration(str_arg(&args, 1)?)?;
            Ok(Value::from(
                (dt + dur).to_rfc3339_opts(SecondsFormat::Secs, true),
            ))
        })
}

/// `formatdate(spec, timestamp)` using the `YYYY-MM-DD`/`hh:mm` token
/// syntax. Quoted text is copied as is.
pub fn create_formatdate_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let dt = DateTime::parse_from_rfc3339(str_arg(&args, 1)?).map_err(|e| e.to_string())?;
            Ok(Value::from(format_date(str_arg(&args, 0)?, &dt)?))
        })
}

fn format_date(spec: &str, dt: &DateTime<FixedOffset>) -> Result<String, String> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            i += 1;
            loop {
                match (chars.get(i), chars.get(i + 1)) {
                    (Some('\''), Some('\'')) => {
                        out.push('\'');
                        i += 2;
                    }
                    (Some('\''), _) => {
                        i += 1;
                        break;
                    }
                    (Some(ch), _) => {
                        out.push(*ch);
                        i += 1;
                    }
                    (None, _) => return Err("unterminated literal in format".to_string()),
                }
            }
            continue;
        }
        if !c.is_ascii_alphabetic() {
            out.push(c);
            i += 1;
            continue;
        }
        let run = chars[i..].iter().take_while(|x| **x == c).count();
        let token: String = chars[i..i + run].iter().collect();
        out.push_str(&date_token(&token, dt)?);
        i += run;
    }
    Ok(out)
}

fn date_token(token: &str, dt: &DateTime<FixedOffset>) -> Result<String, String> {
    let offset = dt.offset().local_minus_utc();
    Ok(match token {
        "YYYY" => format!("{:04}", dt.year()),
        "YY" => format!("{:02}", dt.year() % 100),
        "MMMM" => dt.format("%B").to_string(),
        "MMM" => dt.format("%b").to_string(),
        "MM" => format!("{:02}", dt.month()),
        "M" => dt.month().to_string(),
        "DD" => format!("{:02}", dt.day()),
        "D" => dt.day().to_string(),
        "EEEE" => dt.format("%A").to_string(),
        "EEE" => dt.format("%a").to_string(),
        "hh" => format!("{:02}", dt.hour()),
        "h" => dt.hour().to_string(),
        "HH" => format!("{:02}", (dt.hour() + 11) % 12 + 1),
        "H" => ((dt.hour() + 11) % 12 + 1).to_string(),
        "mm" => format!("{:02}", dt.minute()),
        "m" => dt.minute().to_string(),
        "ss" => format!("{:02}", dt.second()),
        "s" => dt.second().to_string(),
        "AA" => dt.format("%p").to_string(),
        "aa" => dt.format("%P").to_string(),
        "ZZZZZ" => dt.format("%:z").to_string(),
        "ZZZZ" => dt.format("%z").to_string(),
        "ZZZ" if offset == 0 => "UTC".to_string(),
        "ZZZ" => dt.format("%z").to_string(),
        "Z" if offset == 0 => "Z".to_string(),
        "Z" => dt.format("%:z").to_string(),
        other => return Err(format!("invalid date format token {other:?}")),
    })
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if body.is_empty() {
        return Err("invalid duration".to_string());
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("invalid duration {s:?}"))?;
        digits.clear();
        total += match c {
            's' => Duration::seconds(n),
            'm' => Duration::minutes(n),
            'h' => Duration::hours(n),
            _ => return Err(format!("invalid duration unit {c:?}")),
        };
    }
    if !digits.is_empty() {
        return Err(format!("duration {s:?} is missing a unit"));
    }
    Ok(if negative { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::super::eval_str;
    use super::*;

    #[test]
    fn test_timestamp_function() {
        let val = eval_str("timestamp()").unwrap();
        assert!(DateTime::parse_from_rfc3339(val.as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_timeadd_function() {
        assert_eq!(
            eval_str("timeadd(\"2020-01-01T00:00:00Z\", \"1h30m\")").unwrap(),
            Value::from("2020-01-01T01:30:00Z")
        );
        assert_eq!(
            eval_str("timeadd(\"2020-01-01T00:00:00Z\", \"-10s\")").unwrap(),
            Value::from("2019-12-31T23:59:50Z")
        );
    }

    #[test]
    fn test_formatdate_function() {
        assert_eq!(
            eval_str("formatdate(\"DD MMM YYYY hh:mm ZZZ\", \"2018-01-02T23:12:01Z\")").unwrap(),
            Value::from("02 Jan 2018 23:12 UTC")
        );
        assert_eq!(
            eval_str("formatdate(\"EEEE, MMMM D 'at' H:mmaa\", \"2018-01-02T23:12:01-08:00\")")
                .unwrap(),
            Value::from("Tuesday, January 2 at 11:12pm")
        );
        assert!(eval_str("formatdate(\"Q\", \"2018-01-02T23:12:01Z\")").is_err());
    }

    #[test]
    fn test_timeadd_invalid_duration() {
        assert!(eval_str("timeadd(\"2020-01-01T00:00:00Z\", \"5\")").is_err());
        assert!(eval_str("timeadd(\"2020-01-01T00:00:00Z\", \"5d\")").is_err());
    }
}
