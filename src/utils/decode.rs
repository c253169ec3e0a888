use std::borrow::Cow;

/// Percent-decodes a value the way detectors see it.
///
/// Decodes once; if the result still contains `%`, decodes a second time to
/// catch double-encoded payloads (`%2527` → `%27` → `'`). Plus signs become
/// spaces on the first pass only, matching form encoding.
pub fn url_decode_deep(value: &str) -> String {
    let first = url_decode_once(value, true);
    if first.contains('%') {
        url_decode_once(&first, false)
    } else {
        first
    }
}

fn url_decode_once(value: &str, plus_as_space: bool) -> String {
    let replaced: Cow<'_, str> = if plus_as_space && value.contains('+') {
        Cow::Owned(value.replace('+', " "))
    } else {
        Cow::Borrowed(value)
    };
    urlencoding::decode(&replaced)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| replaced.into_owned())
}

/// Decodes the HTML entities attackers lean on to hide markup.
///
/// Covers the named entities for markup characters plus decimal and hex
/// numeric references. Unknown or malformed entities pass through verbatim.
pub fn html_entity_decode(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        // Entities are short; give up past a dozen chars so `&` in prose
        // never scans the whole tail. char_indices keeps this boundary-safe.
        let semi = rest
            .char_indices()
            .take(12)
            .find(|(_, c)| *c == ';')
            .map(|(i, _)| i);
        let Some(semi) = semi else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "sol" => Some('/'),
            _ => decode_numeric_entity(entity),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_numeric_entity(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u32>().ok()?
    };
    char::from_u32(code)
}
