use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone};

const MONTHS: [(&[&str], u32); 12] = [
    (&["janvier", "janv", "jan"], 1),
    (&["fevrier", "fevr", "fev"], 2),
    (&["mars", "mar"], 3),
    (&["avril", "avr"], 4),
    (&["mai"], 5),
    (&["juin"], 6),
    (&["juillet", "juil"], 7),
    (&["aout"], 8),
    (&["septembre", "sept", "sep"], 9),
    (&["octobre", "oct"], 10),
    (&["novembre", "nov"], 11),
    (&["decembre", "dec"], 12),
];

/// Parses the French posting dates shown on listing cards, e.g.
/// `12 janvier 2025 à 14:30`, `Aujourd'hui, 09:05`, `hier à 18h15` or
/// `12/01/2025`. Relative days and the missing year come from `now`, and the
/// result carries `now`'s offset.
pub fn parse_posted_date(text: &str, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let folded = fold(text);
    let mut time = None;
    let mut words = Vec::new();
    for token in folded
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_end_matches('.'))
        .filter(|token| !token.is_empty() && *token != "a" && *token != "le")
    {
        match parse_time(token) {
            Some(parsed) => time = Some(parsed),
            None => words.push(token),
        }
    }

    let today = now.date_naive();
    let date = match words.as_slice() {
        ["aujourd'hui"] => today,
        ["hier"] => today.pred_opt()?,
        [numeric] if numeric.contains('/') => parse_numeric(numeric, today.year())?,
        [day, month] => NaiveDate::from_ymd_opt(today.year(), month_number(month)?, day_number(day)?)?,
        [day, month, year] => {
            NaiveDate::from_ymd_opt(year.parse().ok()?, month_number(month)?, day_number(day)?)?
        }
        _ => return None,
    };

    let local = date.and_time(time.unwrap_or(NaiveTime::MIN));
    now.offset().from_local_datetime(&local).single()
}

fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'à' | 'â' => 'a',
            'û' | 'ù' => 'u',
            'ô' => 'o',
            'î' | 'ï' => 'i',
            '’' => '\'',
            other => other,
        })
        .collect()
}

fn parse_time(token: &str) -> Option<NaiveTime> {
    let (hours, minutes) = token.split_once([':', 'h'])?;
    if hours.is_empty() || !hours.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let minutes = if minutes.is_empty() { "0" } else { minutes };
    if !minutes.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveTime::from_hms_opt(hours.parse().ok()?, minutes.parse().ok()?, 0)
}

fn parse_numeric(token: &str, default_year: i32) -> Option<NaiveDate> {
    let mut parts = token.split('/');
    let day = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let year = match parts.next() {
        Some(year) => year.parse().ok()?,
        None => default_year,
    };
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn day_number(token: &str) -> Option<u32> {
    token.trim_end_matches("er").parse().ok()
}

fn month_number(token: &str) -> Option<u32> {
    MONTHS
        .iter()
        .find(|(names, _)| names.contains(&token))
        .map(|(_, number)| *number)
}
