//! Travel-plan markup engine.
//!
//! Recovers days, time-of-day blocks, categories and line items from the loosely
//! marked-up text a planning assistant produces, renders them as styled markup, and
//! projects itineraries onto calendar events. Every entry point is a pure function of
//! its input text; anything the parsers cannot place falls back to a less structured
//! rendering instead of failing.

pub mod core {
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use serde::{Deserialize, Serialize};
    use std::{fmt, str::FromStr};

    /* ---------------------------- Content types ---------------------------- */

    /// Renderer family selected for a document.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ContentType {
        Itinerary,
        PackingList,
        Budget,
        Unknown,
    }

    impl ContentType {
        pub fn as_str(self) -> &'static str {
            match self {
                ContentType::Itinerary => "itinerary",
                ContentType::PackingList => "packing_list",
                ContentType::Budget => "budget",
                ContentType::Unknown => "unknown",
            }
        }
    }

    impl fmt::Display for ContentType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Raw planner text paired with the content type it was detected as.
    ///
    /// The text is only ever read and re-sliced; everything derived from it is an owned value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Document<'a> {
        pub text: &'a str,
        pub kind: ContentType,
    }

    impl<'a> Document<'a> {
        pub fn new(text: &'a str, kind: ContentType) -> Self {
            Self { text, kind }
        }

        /// Classify `text` with the marker heuristics in `parser::detect_content_type`.
        pub fn detect(text: &'a str) -> Self {
            Self::new(text, crate::parser::detect_content_type(text))
        }
    }

    /* ------------------------- Planning API payload ------------------------- */

    /// The three categories the planning API returns.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Category {
        Itinerary,
        PackingList,
        Budget,
    }

    impl Category {
        pub const ALL: [Category; 3] = [Category::Itinerary, Category::PackingList, Category::Budget];

        /// User-facing message substituted when the category's text is missing.
        pub fn placeholder(self) -> &'static str {
            match self {
                Category::Itinerary => {
                    "No itinerary generated. Please try again with more specific details about your trip."
                }
                Category::PackingList => {
                    "No packing list generated. Please try again with more specific details about your trip."
                }
                Category::Budget => {
                    "No budget estimate generated. Please try again with more specific details about your trip."
                }
            }
        }

        pub fn file_stem(self) -> &'static str {
            match self {
                Category::Itinerary => "itinerary",
                Category::PackingList => "packing_list",
                Category::Budget => "budget",
            }
        }
    }

    /// Planner output as delivered by the API; each category is independently optional.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TravelPlan {
        #[serde(default)]
        pub itinerary: Option<String>,
        #[serde(default)]
        pub packing_list: Option<String>,
        #[serde(default)]
        pub estimated_budget: Option<String>,
    }

    impl TravelPlan {
        pub fn raw(&self, category: Category) -> Option<&str> {
            match category {
                Category::Itinerary => self.itinerary.as_deref(),
                Category::PackingList => self.packing_list.as_deref(),
                Category::Budget => self.estimated_budget.as_deref(),
            }
        }

        /// Source text for `category`, with the placeholder standing in for missing or blank text.
        pub fn text_for(&self, category: Category) -> &str {
            match self.raw(category) {
                Some(text) if !text.trim().is_empty() => text,
                _ => category.placeholder(),
            }
        }
    }

    /// One self-contained markup string per category.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RenderedPlan {
        pub itinerary: String,
        pub packing_list: String,
        pub estimated_budget: String,
    }

    impl RenderedPlan {
        pub fn get(&self, category: Category) -> &str {
            match category {
                Category::Itinerary => &self.itinerary,
                Category::PackingList => &self.packing_list,
                Category::Budget => &self.estimated_budget,
            }
        }
    }

    /* ------------------------------ Time blocks ------------------------------ */

    /// Named day-part an itinerary groups activities under.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub enum TimeBlock {
        Morning,
        Afternoon,
        Evening,
    }

    impl TimeBlock {
        pub const ALL: [TimeBlock; 3] = [TimeBlock::Morning, TimeBlock::Afternoon, TimeBlock::Evening];

        pub fn label(self) -> &'static str {
            match self {
                TimeBlock::Morning => "Morning",
                TimeBlock::Afternoon => "Afternoon",
                TimeBlock::Evening => "Evening",
            }
        }

        /// Case-insensitive lookup of a label such as `evening`.
        pub fn from_label(label: &str) -> Option<Self> {
            let label = label.trim();
            Self::ALL
                .into_iter()
                .find(|block| block.label().eq_ignore_ascii_case(label))
        }
    }

    impl fmt::Display for TimeBlock {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.label())
        }
    }

    impl FromStr for TimeBlock {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Self::from_label(s).ok_or_else(|| DomainError::UnknownTimeBlock(s.to_string()))
        }
    }

    /// Wall-clock window a time block occupies on the calendar.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TimeSlot {
        #[serde(with = "serde_hhmm")]
        pub start: NaiveTime,
        #[serde(with = "serde_hhmm")]
        pub end: NaiveTime,
    }

    impl TimeSlot {
        pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
            Self { start, end }
        }

        fn fixed(start: (u32, u32), end: (u32, u32)) -> Self {
            let at = |(h, m): (u32, u32)| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
            Self::new(at(start), at(end))
        }
    }

    /// `HH:MM-HH:MM`
    impl FromStr for TimeSlot {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let invalid = || DomainError::InvalidSlotSpec(s.to_string());
            let (start, end) = s.split_once('-').ok_or_else(invalid)?;
            let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").map_err(|_| invalid())?;
            let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").map_err(|_| invalid())?;
            if start >= end {
                return Err(DomainError::EmptySlot { start, end });
            }
            Ok(Self::new(start, end))
        }
    }

    /// Calendar placement of each time block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Schedule {
        pub morning: TimeSlot,
        pub afternoon: TimeSlot,
        pub evening: TimeSlot,
    }

    impl Default for Schedule {
        fn default() -> Self {
            Self {
                morning: TimeSlot::fixed((9, 0), (11, 0)),
                afternoon: TimeSlot::fixed((13, 0), (16, 0)),
                evening: TimeSlot::fixed((18, 0), (21, 0)),
            }
        }
    }

    impl Schedule {
        pub fn slot(&self, block: TimeBlock) -> TimeSlot {
            match block {
                TimeBlock::Morning => self.morning,
                TimeBlock::Afternoon => self.afternoon,
                TimeBlock::Evening => self.evening,
            }
        }

        pub fn set_slot(&mut self, block: TimeBlock, slot: TimeSlot) {
            match block {
                TimeBlock::Morning => self.morning = slot,
                TimeBlock::Afternoon => self.afternoon = slot,
                TimeBlock::Evening => self.evening = slot,
            }
        }

        /// Every slot must start strictly before it ends.
        pub fn validate(&self) -> Result<(), DomainError> {
            for block in TimeBlock::ALL {
                let slot = self.slot(block);
                if slot.start >= slot.end {
                    return Err(DomainError::InvalidTimeSlot {
                        block,
                        start: slot.start,
                        end: slot.end,
                    });
                }
            }
            Ok(())
        }
    }

    mod serde_hhmm {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&value.format("%H:%M").to_string())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = String::deserialize(deserializer)?;
            NaiveTime::parse_from_str(&raw, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
                .map_err(serde::de::Error::custom)
        }
    }

    /* ----------------------------- Line model ----------------------------- */

    /// What a single line of planner text is, decided by `parser::classify_line`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "tag", rename_all = "snake_case")]
    pub enum LineTag {
        /// `## Day <label>[: title]`. `number` is set when the label is an integer.
        DayHeader {
            label: String,
            number: Option<i64>,
            /// Heading text without the marker, e.g. `Day 1: Arrival`.
            text: String,
            title: Option<String>,
        },
        /// `#` through `####` followed by text.
        Heading { level: u8, text: String },
        /// A list item naming a time block: `- **Morning**:` or `- **Morning:**`.
        TimeLabel {
            block: TimeBlock,
            indent: usize,
            /// Item text after the list marker.
            item: String,
            /// Whatever follows the label on the same line.
            rest: String,
        },
        /// `- text`, with the width of its leading indentation.
        ListItem { indent: usize, text: String },
        Plain { text: String },
        Blank,
    }

    impl LineTag {
        /// Outline level of heading-like lines; day headers sit at level 2.
        pub fn heading_level(&self) -> Option<u8> {
            match self {
                LineTag::DayHeader { .. } => Some(2),
                LineTag::Heading { level, .. } => Some(*level),
                _ => None,
            }
        }

        pub fn is_heading(&self) -> bool {
            self.heading_level().is_some()
        }
    }

    /// Inline spans recognized inside a line.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum Inline {
        Text(String),
        Strong(String),
        Emphasis(String),
    }

    /// Which inline markers a renderer converts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Spans {
        /// `**bold**` only; lone asterisks stay literal.
        Strong,
        /// `**bold**` and `*emphasis*`.
        StrongAndEmphasis,
    }

    /// Text of the spans with their markers removed.
    pub fn plain_text(inlines: &[Inline]) -> String {
        let mut out = String::new();
        for node in inlines {
            match node {
                Inline::Text(t) | Inline::Strong(t) | Inline::Emphasis(t) => out.push_str(t),
            }
        }
        out
    }

    /* ------------------------------ Sections ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SourceRange {
        pub start: usize,
        pub end: usize,
    }

    impl SourceRange {
        pub fn slice<'a>(&self, source: &'a str) -> &'a str {
            &source[self.start..self.end]
        }

        pub fn is_empty(&self) -> bool {
            self.start >= self.end
        }
    }

    /// A run of text opened by a heading-like marker line.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Section {
        /// Classification of the line that opened the section.
        pub heading: LineTag,
        pub title: String,
        /// Text after the opening line, up to the end of the section.
        pub body: String,
        /// Whole section, opening line included, as byte offsets into the scanned text.
        pub range: SourceRange,
        pub body_range: SourceRange,
    }

    /* ---------------------------- Value records ---------------------------- */

    /// `- **description**: value`; the value stays opaque text.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BudgetItem {
        pub description: String,
        pub value: String,
    }

    /// An itinerary entry found under a time block of a numbered day.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Activity {
        pub title: String,
        pub block: TimeBlock,
        pub day: i64,
    }

    impl Activity {
        /// Place the activity on `date` within `slot`.
        pub fn into_event(
            self,
            date: NaiveDate,
            slot: TimeSlot,
            destination: Option<&str>,
        ) -> CalendarEvent {
            let description = match destination {
                Some(place) => format!("{} activity in {} itinerary", self.block, place),
                None => format!("{} activity in itinerary", self.block),
            };
            CalendarEvent {
                summary: self.title,
                start: date.and_time(slot.start),
                end: date.and_time(slot.end),
                description,
            }
        }
    }

    /// Floating local-time calendar event.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CalendarEvent {
        pub summary: String,
        pub start: NaiveDateTime,
        pub end: NaiveDateTime,
        pub description: String,
    }

    pub const CALENDAR_MIME: &str = "text/calendar";

    /// Serialized calendar plus what a caller needs to deliver it.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CalendarExport {
        pub content: String,
        pub mime_type: String,
        pub filename: String,
        pub events: Vec<CalendarEvent>,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum DomainError {
        #[error("{block} slot must start before it ends ({start} >= {end})")]
        InvalidTimeSlot {
            block: TimeBlock,
            start: NaiveTime,
            end: NaiveTime,
        },
        #[error("time slot must start before it ends ({start} >= {end})")]
        EmptySlot { start: NaiveTime, end: NaiveTime },
        #[error("invalid time slot {0:?} (expected HH:MM-HH:MM)")]
        InvalidSlotSpec(String),
        #[error("unknown time block {0:?} (expected Morning, Afternoon or Evening)")]
        UnknownTimeBlock(String),
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn plan_substitutes_placeholders_for_missing_or_blank_text() {
            let plan = TravelPlan {
                itinerary: Some("   \n".into()),
                packing_list: None,
                estimated_budget: Some("## Budget Estimate".into()),
            };
            assert_eq!(
                plan.text_for(Category::Itinerary),
                Category::Itinerary.placeholder()
            );
            assert_eq!(
                plan.text_for(Category::PackingList),
                Category::PackingList.placeholder()
            );
            assert_eq!(plan.text_for(Category::Budget), "## Budget Estimate");
        }

        #[test]
        fn default_schedule_matches_fixed_windows() {
            let schedule = Schedule::default();
            assert_eq!(schedule.morning, "09:00-11:00".parse::<TimeSlot>().expect("slot"));
            assert_eq!(schedule.afternoon, "13:00-16:00".parse::<TimeSlot>().expect("slot"));
            assert_eq!(schedule.evening, "18:00-21:00".parse::<TimeSlot>().expect("slot"));
            assert!(schedule.validate().is_ok());
        }

        #[test]
        fn schedule_rejects_inverted_slot() {
            let mut schedule = Schedule::default();
            schedule.afternoon.end = schedule.afternoon.start;
            assert!(matches!(
                schedule.validate(),
                Err(DomainError::InvalidTimeSlot {
                    block: TimeBlock::Afternoon,
                    ..
                })
            ));
        }

        #[test]
        fn slot_and_block_parsing() {
            assert!(matches!(
                "10:00-09:00".parse::<TimeSlot>(),
                Err(DomainError::EmptySlot { .. })
            ));
            assert!(matches!(
                "ten to noon".parse::<TimeSlot>(),
                Err(DomainError::InvalidSlotSpec(_))
            ));
            assert_eq!("EVENING".parse::<TimeBlock>().ok(), Some(TimeBlock::Evening));
            assert!(matches!(
                "night".parse::<TimeBlock>(),
                Err(DomainError::UnknownTimeBlock(_))
            ));
        }

        #[test]
        fn schedule_round_trips_hhmm_strings() {
            let json = serde_json::to_string(&Schedule::default()).expect("serialize");
            assert!(json.contains("\"start\":\"09:00\""));
            let back: Schedule = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, Schedule::default());
        }

        #[test]
        fn activity_event_uses_slot_on_base_date() {
            let date = NaiveDate::from_ymd_opt(2025, 6, 1).expect("date");
            let event = Activity {
                title: "Visit Museum".into(),
                block: TimeBlock::Morning,
                day: 1,
            }
            .into_event(date, Schedule::default().morning, Some("Lisbon"));
            assert!(event.start < event.end);
            assert_eq!(event.description, "Morning activity in Lisbon itinerary");
        }
    }
}

pub mod parser {
    //! Line classification, content-type detection and section extraction.
    //!
    //! Each line is classified on its own with `nom` combinators (first match wins:
    //! day header, heading, time label, list item, plain). Structure is then recovered by
    //! scanning classified lines, so a missing or misplaced marker only ever costs the
    //! section it would have opened.

    use crate::core::*;
    use log::debug;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, tag_no_case, take_till1, take_until, take_while1},
        character::complete::{alpha1, anychar, char, space0, space1},
        combinator::recognize,
        error::{VerboseError, VerboseErrorKind},
        sequence::tuple,
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    fn reject<'a, T>(i: &'a str, context: &'static str) -> PResult<'a, T> {
        Err(nom::Err::Error(VerboseError {
            errors: vec![(i, VerboseErrorKind::Context(context))],
        }))
    }

    /* ------------------------------- Lines ------------------------------- */

    /// One line and its byte span; `text` excludes the line ending.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LineSpan<'a> {
        pub start: usize,
        pub end: usize,
        pub text: &'a str,
    }

    pub fn lines(text: &str) -> impl Iterator<Item = LineSpan<'_>> {
        let mut offset = 0;
        text.split_inclusive('\n').map(move |raw| {
            let start = offset;
            offset += raw.len();
            LineSpan {
                start,
                end: offset,
                text: raw.trim_end_matches(['\n', '\r']),
            }
        })
    }

    /* ---------------------------- Classifier ---------------------------- */

    pub fn classify_line(line: &str) -> LineTag {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            return LineTag::Blank;
        }
        match alt((day_header, heading, time_label, list_item))(line) {
            Ok((_, found)) => found,
            Err(_) => LineTag::Plain {
                text: line.trim().to_string(),
            },
        }
    }

    fn day_header(i: &str) -> PResult<'_, LineTag> {
        let (body, _) = tuple((space0, tag("##"), space1))(i)?;
        let (r, _) = tuple((tag_no_case("day"), space1))(body)?;
        let (r, label) = take_till1(|c: char| c == ':' || c.is_whitespace())(r)?;
        let title = r.trim().trim_start_matches([':', '-']).trim();
        Ok((
            "",
            LineTag::DayHeader {
                label: label.to_string(),
                number: label.parse().ok(),
                text: body.trim().to_string(),
                title: (!title.is_empty()).then(|| title.to_string()),
            },
        ))
    }

    fn heading(i: &str) -> PResult<'_, LineTag> {
        let (i, _) = space0(i)?;
        let (i, hashes) = take_while1(|c: char| c == '#')(i)?;
        if hashes.len() > 4 {
            return reject(i, "heading-depth");
        }
        let (i, _) = space1(i)?;
        let text = i.trim();
        if text.is_empty() {
            return reject(i, "heading-text");
        }
        Ok((
            "",
            LineTag::Heading {
                level: hashes.len() as u8,
                text: text.to_string(),
            },
        ))
    }

    fn time_label(i: &str) -> PResult<'_, LineTag> {
        let (i, indent) = space0(i)?;
        let (i, _) = char('-')(i)?;
        let (item, _) = space1(i)?;
        let (r, _) = tag("**")(item)?;
        let (r, name) = alpha1(r)?;
        let Some(block) = TimeBlock::from_label(name) else {
            return reject(r, "time-label");
        };
        let (r, _) = alt((recognize(tuple((tag("**"), space0, char(':')))), tag(":**")))(r)?;
        Ok((
            "",
            LineTag::TimeLabel {
                block,
                indent: indent.len(),
                item: item.trim_end().to_string(),
                rest: r.trim().to_string(),
            },
        ))
    }

    fn list_item(i: &str) -> PResult<'_, LineTag> {
        let (i, indent) = space0(i)?;
        let (i, _) = char('-')(i)?;
        let (i, _) = space1(i)?;
        Ok((
            "",
            LineTag::ListItem {
                indent: indent.len(),
                text: i.trim().to_string(),
            },
        ))
    }

    /// First heading of exactly `level`, with the byte offset of its line.
    pub fn first_heading(text: &str, level: u8) -> Option<(usize, String)> {
        lines(text).find_map(|line| match classify_line(line.text) {
            LineTag::Heading { level: l, text } if l == level => Some((line.start, text)),
            _ => None,
        })
    }

    /* --------------------------- Inline spans --------------------------- */

    /// Split `text` into plain runs and the spans `spans` enables. Unpaired markers stay literal.
    pub fn parse_inlines(text: &str, spans: Spans) -> Vec<Inline> {
        let mut out = Vec::new();
        let mut i = text;
        while !i.is_empty() {
            let atom = match spans {
                Spans::Strong => alt((strong, text_chunk))(i),
                Spans::StrongAndEmphasis => alt((strong, emphasis, text_chunk))(i),
            };
            match atom {
                Ok((r, node)) => {
                    out.push(node);
                    i = r;
                }
                Err(_) => match anychar::<_, VerboseError<&str>>(i) {
                    Ok((r, ch)) => {
                        out.push(Inline::Text(ch.to_string()));
                        i = r;
                    }
                    Err(_) => break,
                },
            }
        }
        coalesce_text(&mut out);
        out
    }

    fn coalesce_text(xs: &mut Vec<Inline>) {
        let mut out = Vec::with_capacity(xs.len());
        for x in xs.drain(..) {
            if let (Some(Inline::Text(prev)), Inline::Text(s)) = (out.last_mut(), &x) {
                prev.push_str(s);
            } else {
                out.push(x);
            }
        }
        *xs = out;
    }

    fn strong(i: &str) -> PResult<'_, Inline> {
        let (i, _) = tag("**")(i)?;
        let (i, body) = take_until("**")(i)?;
        if body.is_empty() || body.contains('\n') {
            return reject(i, "strong");
        }
        let (i, _) = tag("**")(i)?;
        Ok((i, Inline::Strong(body.to_string())))
    }

    fn emphasis(i: &str) -> PResult<'_, Inline> {
        let (i, _) = char('*')(i)?;
        let (i, body) = take_till1(|c: char| c == '*' || c == '\n')(i)?;
        let (i, _) = char('*')(i)?;
        Ok((i, Inline::Emphasis(body.to_string())))
    }

    fn text_chunk(i: &str) -> PResult<'_, Inline> {
        let (i, s) = take_while1(|c: char| c != '*')(i)?;
        Ok((i, Inline::Text(s.to_string())))
    }

    /* ------------------------- Content detection ------------------------- */

    /// Pick a renderer from marker words, in fixed priority order. Never fails.
    pub fn detect_content_type(text: &str) -> ContentType {
        let kind = if text.contains("Itinerary") || text.contains("Day 1:") {
            ContentType::Itinerary
        } else if text.contains("List") {
            ContentType::PackingList
        } else if text.contains("Budget") {
            ContentType::Budget
        } else {
            ContentType::Unknown
        };
        debug!("detected {} content ({} bytes)", kind, text.len());
        kind
    }

    /* ------------------------------ Sections ------------------------------ */

    /// Which line opens a section and which lines end one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SectionMarker {
        /// Day headers. A day runs to the next day header or the end of the text.
        Day,
        /// Headings of exactly this level. Runs to the next heading of any level.
        Heading(u8),
        /// Time labels. Runs to the next label, any heading, or an unindented list item.
        TimeBlock,
    }

    impl SectionMarker {
        fn opens(self, line: &LineTag) -> Option<String> {
            match (self, line) {
                (SectionMarker::Day, LineTag::DayHeader { text, .. }) => Some(text.clone()),
                (SectionMarker::Heading(want), LineTag::Heading { level, text }) if *level == want => {
                    Some(text.clone())
                }
                (SectionMarker::TimeBlock, LineTag::TimeLabel { block, .. }) => {
                    Some(block.label().to_string())
                }
                _ => None,
            }
        }

        fn closes(self, line: &LineTag) -> bool {
            match self {
                SectionMarker::Day => matches!(line, LineTag::DayHeader { .. }),
                SectionMarker::Heading(_) => line.is_heading(),
                SectionMarker::TimeBlock => {
                    line.is_heading()
                        || matches!(
                            line,
                            LineTag::TimeLabel { .. } | LineTag::ListItem { indent: 0, .. }
                        )
                }
            }
        }
    }

    /// All sections `marker` opens in `text`, in order. An empty result means "no structure".
    pub fn extract_sections(text: &str, marker: SectionMarker) -> Vec<Section> {
        struct Open {
            heading: LineTag,
            title: String,
            start: usize,
            body_start: usize,
        }

        fn finish(text: &str, open: Open, end: usize) -> Section {
            let body_range = SourceRange {
                start: open.body_start.min(end),
                end,
            };
            Section {
                heading: open.heading,
                title: open.title,
                body: body_range.slice(text).to_string(),
                range: SourceRange {
                    start: open.start,
                    end,
                },
                body_range,
            }
        }

        let mut out = Vec::new();
        let mut open: Option<Open> = None;
        for line in lines(text) {
            let found = classify_line(line.text);
            if marker.closes(&found) {
                if let Some(prev) = open.take() {
                    out.push(finish(text, prev, line.start));
                }
            }
            if let Some(title) = marker.opens(&found) {
                open = Some(Open {
                    heading: found,
                    title,
                    start: line.start,
                    body_start: line.end,
                });
            }
        }
        if let Some(prev) = open.take() {
            out.push(finish(text, prev, text.len()));
        }
        out
    }

    /// First section opened by `marker` whose title satisfies `pred`, wherever it sits.
    pub fn find_section(
        text: &str,
        marker: SectionMarker,
        pred: impl Fn(&str) -> bool,
    ) -> Option<Section> {
        extract_sections(text, marker)
            .into_iter()
            .find(|section| pred(&section.title))
    }

    /* ---------------------------- Budget items ---------------------------- */

    /// Parse `**description**: value` or `**description:** value`. Anything else is `None`.
    pub fn parse_budget_item(item: &str) -> Option<BudgetItem> {
        budget_item(item.trim()).ok().map(|(_, item)| item)
    }

    fn budget_item(i: &str) -> PResult<'_, BudgetItem> {
        let (i, _) = tag("**")(i)?;
        let (i, label) = take_until("**")(i)?;
        let (i, _) = tag("**")(i)?;
        let (description, value) = match label.trim_end().strip_suffix(':') {
            Some(description) => (description, i),
            None => {
                let (i, _) = tuple((space0, char(':')))(i)?;
                (label, i)
            }
        };
        let description = description.trim();
        if description.is_empty() {
            return reject(i, "budget-description");
        }
        Ok((
            "",
            BudgetItem {
                description: description.to_string(),
                value: value.trim().to_string(),
            },
        ))
    }

}

pub mod format {
    //! Markup and calendar-text writers shared by the renderers and the exporter.

    use crate::core::{CalendarEvent, Inline, Spans};
    use crate::parser::parse_inlines;
    use chrono::NaiveDateTime;
    use std::fmt::Write;

    /* -------------------------------- Markup -------------------------------- */

    pub const STYLE_BLOCK: &str = r#"<style>
.formatted-content { line-height: 1.6; color: #333; }
.day-section { margin-bottom: 24px; padding: 16px; border-left: 4px solid #3498db; background: #f8f9fa; border-radius: 4px; }
.day-title { font-size: 1.3em; font-weight: bold; color: #2c3e50; margin-bottom: 12px; }
.time-block { margin: 12px 0 6px; }
.time-label { font-weight: bold; color: #e67e22; }
.activity-item { margin: 4px 0 4px 20px; }
.info-section { margin-top: 12px; }
.info-section h3 { font-size: 1.05em; color: #2c3e50; }
.day-notes { margin-top: 8px; color: #555; }
.list-item { margin: 4px 0 4px 12px; }
.packing-section { margin-bottom: 20px; }
.packing-category { font-size: 1.2em; color: #2c3e50; border-bottom: 2px solid #3498db; padding-bottom: 4px; }
.packing-item { display: flex; align-items: center; margin: 6px 0; }
.packing-checkbox { margin-right: 10px; }
.packing-note { margin-top: 16px; padding: 12px; background: #fff8e1; border-left: 4px solid #f1c40f; font-style: italic; }
.budget-title { font-size: 1.5em; color: #2c3e50; }
.budget-category { margin-bottom: 18px; }
.category-title { font-size: 1.15em; color: #2c3e50; border-bottom: 1px solid #ddd; padding-bottom: 4px; }
.budget-item { display: flex; justify-content: space-between; margin: 6px 0; }
.item-desc { font-weight: 500; }
.item-value { color: #27ae60; font-weight: bold; }
.total-section { margin-top: 20px; padding: 12px; background: #eafaf1; border-radius: 4px; }
.budget-note { margin-top: 16px; font-style: italic; color: #666; }
</style>"#;

    /// Wrap rendered fragments into the self-contained output container.
    pub fn wrap_document(inner: &str) -> String {
        format!("<div class=\"formatted-content\">{STYLE_BLOCK}{inner}</div>")
    }

    pub fn escape_html(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                c => out.push(c),
            }
        }
        out
    }

    fn unescape_html(text: &str) -> String {
        text.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&")
    }

    /// Escape `text` and turn the spans `spans` enables into `<strong>` / `<em>`.
    pub fn render_inline(text: &str, spans: Spans) -> String {
        let mut out = String::with_capacity(text.len() + 16);
        for node in parse_inlines(text, spans) {
            match node {
                Inline::Text(t) => out.push_str(&escape_html(&t)),
                Inline::Strong(t) => {
                    let _ = write!(out, "<strong>{}</strong>", escape_html(&t));
                }
                Inline::Emphasis(t) => {
                    let _ = write!(out, "<em>{}</em>", escape_html(&t));
                }
            }
        }
        out
    }

    /// Visible text of rendered markup: tags and the style block dropped, one trimmed
    /// line per block element or line break, blank lines removed.
    pub fn strip_markup(markup: &str) -> String {
        let mut text = String::with_capacity(markup.len());
        let mut rest = markup;
        while let Some(open) = rest.find('<') {
            text.push_str(&rest[..open]);
            let Some(close) = rest[open..].find('>') else {
                text.push_str(&rest[open..]);
                rest = "";
                break;
            };
            let tag = &rest[open + 1..open + close];
            rest = &rest[open + close + 1..];
            let closing = tag.starts_with('/');
            let name = tag
                .trim_start_matches('/')
                .split(|c: char| c.is_whitespace() || c == '/')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            match name.as_str() {
                "style" if !closing => {
                    rest = rest
                        .find("</style>")
                        .map_or("", |end| &rest[end + "</style>".len()..]);
                }
                "br" => text.push('\n'),
                "div" | "p" | "h1" | "h2" | "h3" | "h4" if closing => text.push('\n'),
                _ => {}
            }
        }
        text.push_str(rest);
        unescape_html(&text)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /* ------------------------------- Calendar ------------------------------- */

    /// Floating local timestamp, `YYYYMMDDTHHMMSS`.
    pub fn ics_datetime(at: NaiveDateTime) -> String {
        at.format("%Y%m%dT%H%M%S").to_string()
    }

    /// TEXT value escaping: backslash, semicolon, comma and line breaks.
    pub fn escape_ics_text(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                ';' => out.push_str("\\;"),
                ',' => out.push_str("\\,"),
                '\n' => out.push_str("\\n"),
                '\r' => {}
                c => out.push(c),
            }
        }
        out
    }

    /// Serialize events, in order, into a single calendar with `\n` line endings.
    pub fn format_calendar(events: &[CalendarEvent], product_id: &str) -> String {
        let mut out = String::from("BEGIN:VCALENDAR\nVERSION:2.0\n");
        let _ = writeln!(out, "PRODID:{}", product_id);
        for event in events {
            out.push_str("BEGIN:VEVENT\n");
            let _ = writeln!(out, "SUMMARY:{}", escape_ics_text(&event.summary));
            let _ = writeln!(out, "DTSTART:{}", ics_datetime(event.start));
            let _ = writeln!(out, "DTEND:{}", ics_datetime(event.end));
            let _ = writeln!(out, "DESCRIPTION:{}", escape_ics_text(&event.description));
            out.push_str("END:VEVENT\n");
        }
        out.push_str("END:VCALENDAR");
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::NaiveDate;

        #[test]
        fn inline_rendering_escapes_inside_and_outside_spans() {
            assert_eq!(
                render_inline("Fish & **<chips>**", Spans::Strong),
                "Fish &amp; <strong>&lt;chips&gt;</strong>"
            );
            assert_eq!(
                render_inline("a *b* c", Spans::Strong),
                "a *b* c"
            );
            assert_eq!(
                render_inline("a *b* c", Spans::StrongAndEmphasis),
                "a <em>b</em> c"
            );
        }

        #[test]
        fn wrapped_document_carries_style_block_once() {
            let doc = wrap_document("<p>x</p>");
            assert!(doc.starts_with("<div class=\"formatted-content\"><style>"));
            assert!(doc.ends_with("<p>x</p></div>"));
            assert_eq!(doc.matches("<style>").count(), 1);
        }

        #[test]
        fn strip_markup_drops_styles_and_tags() {
            let doc = wrap_document("<h2>Day &amp; Night</h2>Line one<br>Line <strong>two</strong>");
            assert_eq!(strip_markup(&doc), "Day & Night\nLine one\nLine two");
        }

        #[test]
        fn calendar_text_is_escaped() {
            assert_eq!(
                escape_ics_text("Lunch; tapas, wine\\beer\nlater"),
                "Lunch\\; tapas\\, wine\\\\beer\\nlater"
            );
        }

        #[test]
        fn calendar_layout() {
            let day = NaiveDate::from_ymd_opt(2025, 3, 10).expect("date");
            let event = CalendarEvent {
                summary: "Visit Museum".into(),
                start: day.and_hms_opt(9, 0, 0).expect("time"),
                end: day.and_hms_opt(11, 0, 0).expect("time"),
                description: "Morning activity in Chicago itinerary".into(),
            };
            let ics = format_calendar(&[event], "-//Test//EN");
            assert_eq!(
                ics,
                "BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//Test//EN\n\
                 BEGIN:VEVENT\nSUMMARY:Visit Museum\nDTSTART:20250310T090000\n\
                 DTEND:20250310T110000\nDESCRIPTION:Morning activity in Chicago itinerary\n\
                 END:VEVENT\nEND:VCALENDAR"
            );
            assert_eq!(
                format_calendar(&[], "-//Test//EN"),
                "BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//Test//EN\nEND:VCALENDAR"
            );
        }
    }
}

pub mod render {
    //! Content-type dispatch and the four renderers.
    //!
    //! Each renderer recovers the structure its content type expects and falls back to
    //! [`generic`] when it finds none. Text outside every recognized section is still
    //! rendered generically, in document order, so nothing the planner wrote is dropped.

    use crate::core::*;
    use crate::format::wrap_document;
    use crate::parser::lines;
    use log::debug;

    /// Detect the content type of `text` and render it.
    pub fn render_document(text: &str) -> String {
        let doc = Document::detect(text);
        render_as(doc.kind, doc.text)
    }

    pub fn render_as(kind: ContentType, text: &str) -> String {
        debug!("rendering {} bytes as {}", text.len(), kind);
        let inner = match kind {
            ContentType::Itinerary => itinerary::render(text),
            ContentType::PackingList => packing::render(text),
            ContentType::Budget => budget::render(text),
            ContentType::Unknown => generic::render(text),
        };
        wrap_document(&inner)
    }

    /// Render every category of an API payload, substituting placeholders for missing text.
    pub fn render_plan(plan: &TravelPlan) -> RenderedPlan {
        RenderedPlan {
            itinerary: render_document(plan.text_for(Category::Itinerary)),
            packing_list: render_document(plan.text_for(Category::PackingList)),
            estimated_budget: render_document(plan.text_for(Category::Budget)),
        }
    }

    /// Lines of `text[range]` minus the line starting at byte `skip`, blank edges trimmed.
    fn loose_text(text: &str, range: SourceRange, skip: Option<usize>) -> String {
        if range.is_empty() {
            return String::new();
        }
        lines(range.slice(text))
            .filter(|line| Some(range.start + line.start) != skip)
            .map(|line| line.text)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    fn render_loose(text: &str, range: SourceRange, skip: Option<usize>) -> String {
        let loose = loose_text(text, range, skip);
        if loose.is_empty() {
            String::new()
        } else {
            generic::render(&loose)
        }
    }

    fn is_note_title(title: &str) -> bool {
        title
            .trim()
            .trim_end_matches(':')
            .trim()
            .eq_ignore_ascii_case("note")
    }

    pub mod generic {
        //! Fallback renderer: headings, list items, emphasis and line breaks.

        use crate::core::{LineTag, Spans};
        use crate::format::render_inline;
        use crate::parser::{classify_line, lines};
        use std::fmt::Write;

        pub fn render(text: &str) -> String {
            let all: Vec<_> = lines(text).collect();
            let mut out = String::with_capacity(text.len() * 2);
            for (idx, line) in all.iter().enumerate() {
                match classify_line(line.text) {
                    LineTag::DayHeader { text, .. } => {
                        push_heading(&mut out, 2, &text);
                        continue;
                    }
                    LineTag::Heading { level, text } => {
                        push_heading(&mut out, level, &text);
                        continue;
                    }
                    LineTag::TimeLabel { item: text, .. } | LineTag::ListItem { text, .. } => {
                        let _ = write!(
                            out,
                            "<div class=\"list-item\">• {}</div>",
                            render_inline(&text, Spans::StrongAndEmphasis)
                        );
                    }
                    LineTag::Plain { text } => {
                        out.push_str(&render_inline(&text, Spans::StrongAndEmphasis))
                    }
                    LineTag::Blank => {}
                }
                if idx + 1 < all.len() {
                    out.push_str("<br>");
                }
            }
            out
        }

        fn push_heading(out: &mut String, level: u8, text: &str) {
            let _ = write!(
                out,
                "<h{level}>{}</h{level}>",
                render_inline(text, Spans::StrongAndEmphasis)
            );
        }
    }

    pub mod itinerary {
        //! Days, their time blocks and activities, and per-day info sections.

        use super::{generic, render_loose};
        use crate::core::*;
        use crate::format::render_inline;
        use crate::parser::{SectionMarker, classify_line, extract_sections, first_heading, lines};
        use log::debug;
        use std::collections::BTreeSet;
        use std::fmt::Write;

        pub fn render(text: &str) -> String {
            let days = extract_sections(text, SectionMarker::Day);
            if days.is_empty() {
                debug!("no day headers found; rendering itinerary generically");
                return generic::render(text);
            }

            let title = first_heading(text, 1);
            let skip = title.as_ref().map(|(start, _)| *start);
            let mut out = String::new();
            if let Some((_, title)) = &title {
                let _ = write!(out, "<h1>{}</h1>", render_inline(title, Spans::Strong));
            }

            let mut cursor = 0;
            for day in &days {
                let gap = SourceRange {
                    start: cursor,
                    end: day.range.start,
                };
                out.push_str(&render_loose(text, gap, skip));
                out.push_str(&render_day(day));
                cursor = day.range.end;
            }
            let tail = SourceRange {
                start: cursor,
                end: text.len(),
            };
            out.push_str(&render_loose(text, tail, skip));
            out
        }

        fn render_day(day: &Section) -> String {
            let body = day.body.as_str();
            // Body-relative offsets of lines some block already rendered.
            let mut used = BTreeSet::new();
            let mut out = format!(
                "<div class=\"day-section\"><div class=\"day-title\">{}</div>",
                render_inline(&day.title, Spans::Strong)
            );

            for run in extract_sections(body, SectionMarker::TimeBlock) {
                used.insert(run.range.start);
                out.push_str(&render_time_block(&run, &mut used));
            }
            for info in extract_sections(body, SectionMarker::Heading(3)) {
                used.insert(info.range.start);
                out.push_str(&render_info(&info, &mut used));
            }

            let notes = lines(body)
                .filter(|line| !used.contains(&line.start))
                .map(|line| line.text)
                .collect::<Vec<_>>()
                .join("\n");
            let notes = notes.trim();
            if !notes.is_empty() {
                let _ = write!(out, "<div class=\"day-notes\">{}</div>", generic::render(notes));
            }
            out.push_str("</div>");
            out
        }

        fn render_time_block(run: &Section, used: &mut BTreeSet<usize>) -> String {
            let LineTag::TimeLabel { block, rest, .. } = &run.heading else {
                return String::new();
            };
            let mut out = format!(
                "<div class=\"time-block\"><span class=\"time-label\">{}:</span>",
                block.label()
            );
            if !rest.is_empty() {
                let _ = write!(out, " {}", render_inline(rest, Spans::Strong));
            }
            out.push_str("</div>");

            for line in lines(&run.body) {
                if let LineTag::ListItem { text, .. } = classify_line(line.text) {
                    if text.is_empty() {
                        continue;
                    }
                    used.insert(run.body_range.start + line.start);
                    let _ = write!(
                        out,
                        "<div class=\"activity-item\">{}</div>",
                        render_inline(&text, Spans::Strong)
                    );
                }
            }
            out
        }

        fn render_info(info: &Section, used: &mut BTreeSet<usize>) -> String {
            let mut out = format!(
                "<div class=\"info-section\"><h3>{}</h3>",
                render_inline(&info.title, Spans::Strong)
            );
            for line in lines(&info.body) {
                if !used.insert(info.body_range.start + line.start) {
                    continue;
                }
                match classify_line(line.text) {
                    LineTag::ListItem { text, .. } | LineTag::TimeLabel { item: text, .. }
                        if !text.is_empty() =>
                    {
                        let _ = write!(out, "<div>• {}</div>", render_inline(&text, Spans::Strong));
                    }
                    LineTag::Plain { text } => {
                        let _ = write!(out, "<p>{}</p>", render_inline(&text, Spans::Strong));
                    }
                    _ => {}
                }
            }
            out.push_str("</div>");
            out
        }
    }

    pub mod packing {
        //! Packing categories as checklists, plus the trailing note block.

        use super::{generic, is_note_title, render_loose};
        use crate::core::*;
        use crate::format::render_inline;
        use crate::parser::{SectionMarker, classify_line, extract_sections, find_section, lines};
        use log::debug;
        use std::fmt::Write;

        pub fn render(text: &str) -> String {
            let categories = extract_sections(text, SectionMarker::Heading(2));
            if categories.is_empty() {
                debug!("no packing categories found; rendering generically");
                return generic::render(text);
            }

            let mut out = String::new();
            let mut cursor = 0;
            for category in &categories {
                let gap = SourceRange {
                    start: cursor,
                    end: category.range.start,
                };
                out.push_str(&render_loose(text, gap, None));
                out.push_str(&render_category(category));
                cursor = category.range.end;
            }
            let tail = SourceRange {
                start: cursor,
                end: text.len(),
            };
            out.push_str(&render_loose(text, tail, None));

            // Looked up independently of the loop above, so a `## Note` category renders twice.
            if let Some(note) = find_section(text, SectionMarker::Heading(2), is_note_title) {
                out.push_str(&render_note(&note));
            }
            out
        }

        fn render_category(category: &Section) -> String {
            let mut out = format!(
                "<div class=\"packing-section\"><h2 class=\"packing-category\">{}</h2>",
                render_inline(&category.title, Spans::Strong)
            );
            for line in lines(&category.body) {
                match classify_line(line.text) {
                    LineTag::ListItem { text, .. } | LineTag::TimeLabel { item: text, .. }
                        if !text.is_empty() =>
                    {
                        let _ = write!(
                            out,
                            "<div class=\"packing-item\"><input type=\"checkbox\" class=\"packing-checkbox\"><span>{}</span></div>",
                            render_inline(&text, Spans::Strong)
                        );
                    }
                    LineTag::Plain { text } => {
                        let _ = write!(out, "<p>{}</p>", render_inline(&text, Spans::Strong));
                    }
                    _ => {}
                }
            }
            out.push_str("</div>");
            out
        }

        fn render_note(note: &Section) -> String {
            let mut out = String::from("<div class=\"packing-note\"><h3>Note</h3>");
            for line in lines(&note.body) {
                match classify_line(line.text) {
                    LineTag::ListItem { text, .. } | LineTag::TimeLabel { item: text, .. }
                        if !text.is_empty() =>
                    {
                        let _ = write!(out, "<p>• {}</p>", render_inline(&text, Spans::Strong));
                    }
                    LineTag::Plain { text } => {
                        let _ = write!(out, "<p>{}</p>", render_inline(&text, Spans::Strong));
                    }
                    _ => {}
                }
            }
            out.push_str("</div>");
            out
        }
    }

    pub mod budget {
        //! Budget title, cost categories, the total block and the note.

        use super::{generic, is_note_title, render_loose};
        use crate::core::*;
        use crate::format::render_inline;
        use crate::parser::{
            SectionMarker, classify_line, extract_sections, find_section, lines, parse_budget_item,
        };
        use log::debug;
        use std::fmt::Write;

        const TITLE_PREFIX: &str = "Budget Estimate";
        const TOTAL_MARKER: &str = "Total Estimated Budget";

        pub fn render(text: &str) -> String {
            let title = budget_title(text);
            let title_start = title.as_ref().map(|(start, _)| *start);
            let level = category_level(text, title_start);
            let sections = extract_sections(text, SectionMarker::Heading(level));
            let note = find_section(text, SectionMarker::Heading(4), is_note_title);
            let note_start = note.as_ref().map(|n| n.range.start);

            let mut pieces = Vec::new();
            let mut has_total = false;
            for section in &sections {
                let start = Some(section.range.start);
                if start == title_start || start == note_start {
                    continue;
                }
                if section.title.contains(TOTAL_MARKER) {
                    // Only the first total is structured; later ones stay loose text.
                    if !has_total {
                        has_total = true;
                        pieces.push(Piece::Total(section));
                    }
                } else {
                    pieces.push(Piece::Category(section));
                }
            }
            if let Some(note) = &note {
                pieces.push(Piece::Note(note));
            }
            if pieces.is_empty() {
                debug!("no budget categories found; rendering generically");
                return generic::render(text);
            }
            pieces.sort_by_key(|piece| piece.range().start);

            let mut out = String::new();
            if let Some((_, title)) = &title {
                let _ = write!(
                    out,
                    "<h1 class=\"budget-title\">{}</h1>",
                    render_inline(title, Spans::Strong)
                );
            }

            let mut cursor = 0;
            for piece in &pieces {
                let range = piece.range();
                let gap = SourceRange {
                    start: cursor,
                    end: range.start,
                };
                out.push_str(&render_loose(text, gap, title_start));
                match piece {
                    Piece::Category(section) => {
                        out.push_str(&render_category(section, "budget-category"))
                    }
                    Piece::Total(section) => out.push_str(&render_category(section, "total-section")),
                    Piece::Note(note) => {
                        let _ = write!(
                            out,
                            "<div class=\"budget-note\"><h3>Note:</h3>{}</div>",
                            generic::render(note.body.trim())
                        );
                    }
                }
                cursor = range.end;
            }
            let tail = SourceRange {
                start: cursor,
                end: text.len(),
            };
            out.push_str(&render_loose(text, tail, title_start));
            out
        }

        enum Piece<'a> {
            Category(&'a Section),
            Total(&'a Section),
            Note(&'a Section),
        }

        impl Piece<'_> {
            fn range(&self) -> SourceRange {
                match self {
                    Piece::Category(section) | Piece::Total(section) | Piece::Note(section) => {
                        section.range
                    }
                }
            }
        }

        /// First level 1–3 heading starting with the budget title prefix.
        fn budget_title(text: &str) -> Option<(usize, String)> {
            lines(text).find_map(|line| match classify_line(line.text) {
                LineTag::Heading {
                    level: 1..=3,
                    text,
                } if text.starts_with(TITLE_PREFIX) => Some((line.start, text)),
                _ => None,
            })
        }

        /// Categories sit at level 3, or at level 4 when no level-3 heading besides the title exists.
        fn category_level(text: &str, title_start: Option<usize>) -> u8 {
            let has_level3 = lines(text).any(|line| {
                Some(line.start) != title_start
                    && matches!(classify_line(line.text), LineTag::Heading { level: 3, .. })
            });
            if has_level3 { 3 } else { 4 }
        }

        fn render_category(section: &Section, class: &str) -> String {
            let mut out = format!(
                "<div class=\"{class}\"><h3 class=\"category-title\">{}</h3>",
                render_inline(&section.title, Spans::Strong)
            );
            for line in lines(&section.body) {
                let item = match classify_line(line.text) {
                    LineTag::ListItem { text, .. } | LineTag::TimeLabel { item: text, .. } => {
                        parse_budget_item(&text)
                    }
                    _ => None,
                };
                if let Some(item) = item {
                    out.push_str(&render_item(&item));
                }
            }
            out.push_str("</div>");
            out
        }

        fn render_item(item: &BudgetItem) -> String {
            format!(
                "<div class=\"budget-item\"><div class=\"item-desc\">{}</div><div class=\"item-value\">{}</div></div>",
                render_inline(&item.description, Spans::Strong),
                render_inline(&item.value, Spans::Strong)
            )
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::format::strip_markup;

        const ITINERARY: &str = r#"# Chicago Travel Itinerary for 3 Days

## Overview
Welcome to Chicago.

## Day 1: Arrival
- **Morning**:
  - Visit **Art Institute** of Chicago
  - Walk the Riverwalk
- **Afternoon**:
  - Lunch at Portillo's
- **Evening**:
  - Dinner at Alinea

### Tips:
- Buy a Ventra card
Bring an umbrella

## Day 3: Departure
- **Morning:**
  - Visit Museum
Stray line

## Accommodation
- **Mid-Range**: Hotel Julian
"#;

        const PACKING: &str = r#"# Packing List for Chicago

## Clothing
- Rain jacket
- **Comfortable** walking shoes

## Toiletries
- Sunscreen

## Note
- Check the forecast before leaving
"#;

        const BUDGET: &str = r#"## Budget Estimate for Chicago

### Accommodation
- **Hotel**: $200

### Total Estimated Budget
- **Total**: $800

#### Note:
Prices vary by season.
"#;

        fn pos(haystack: &str, needle: &str) -> usize {
            haystack
                .find(needle)
                .unwrap_or_else(|| panic!("missing {:?} in {}", needle, haystack))
        }

        #[test]
        fn generic_rendering_shapes() {
            assert_eq!(
                generic::render("# T\nSome **b** and *e*\n- item"),
                "<h1>T</h1>Some <strong>b</strong> and <em>e</em><br><div class=\"list-item\">• item</div>"
            );
            assert_eq!(generic::render("a\n\nb\n"), "a<br><br>b");
            assert_eq!(generic::render(""), "");
        }

        #[test]
        fn one_day_block_per_day_header() {
            let html = itinerary::render(ITINERARY);
            assert_eq!(html.matches("class=\"day-section\"").count(), 2);
            assert!(html.contains("<div class=\"day-title\">Day 1: Arrival</div>"));
            assert!(html.contains("<div class=\"day-title\">Day 3: Departure</div>"));
        }

        #[test]
        fn activities_keep_order_and_bold() {
            let html = itinerary::render(ITINERARY);
            assert!(html.contains(
                "<div class=\"time-block\"><span class=\"time-label\">Morning:</span></div>\
                 <div class=\"activity-item\">Visit <strong>Art Institute</strong> of Chicago</div>\
                 <div class=\"activity-item\">Walk the Riverwalk</div>"
            ));
            let lunch = pos(&html, "Lunch at Portillo&#39;s");
            let dinner = pos(&html, "Dinner at Alinea");
            assert!(pos(&html, "Walk the Riverwalk") < lunch && lunch < dinner);
        }

        #[test]
        fn info_sections_and_leftover_lines_stay_inside_their_day() {
            let html = itinerary::render(ITINERARY);
            assert!(html.contains(
                "<div class=\"info-section\"><h3>Tips:</h3><div>• Buy a Ventra card</div><p>Bring an umbrella</p></div>"
            ));
            assert!(html.contains("<div class=\"day-notes\">Stray line<br><br>"));
            assert!(pos(&html, "Stray line") > pos(&html, "Day 3: Departure"));
        }

        #[test]
        fn last_day_keeps_trailing_outer_headings() {
            let html = itinerary::render(ITINERARY);
            assert!(html.ends_with(
                "<div class=\"day-notes\">Stray line<br><br><h2>Accommodation</h2>\
                 <div class=\"list-item\">• <strong>Mid-Range</strong>: Hotel Julian</div></div></div>"
            ));

            let html = itinerary::render("## Day 1: A\n- x\n## Accommodation\n- Hotel\n");
            assert_eq!(html.matches("class=\"day-section\"").count(), 1);
            assert!(html.ends_with(
                "<h2>Accommodation</h2><div class=\"list-item\">• Hotel</div></div></div>"
            ));
        }

        #[test]
        fn text_outside_days_is_rendered_in_order() {
            let html = itinerary::render(ITINERARY);
            assert!(html.starts_with("<h1>Chicago Travel Itinerary for 3 Days</h1>"));
            assert_eq!(html.matches("Chicago Travel Itinerary").count(), 1);
            assert!(html.contains("<h2>Overview</h2>Welcome to Chicago."));
            assert!(pos(&html, "<h2>Overview</h2>") < pos(&html, "Day 1: Arrival"));
        }

        #[test]
        fn day_without_time_blocks_still_renders_title() {
            let html = itinerary::render("## Day 1: Rest\n");
            assert_eq!(
                html,
                "<div class=\"day-section\"><div class=\"day-title\">Day 1: Rest</div></div>"
            );
        }

        #[test]
        fn packing_categories_become_checklists() {
            let html = packing::render(PACKING);
            assert!(html.starts_with("<h1>Packing List for Chicago</h1>"));
            assert!(html.contains(
                "<div class=\"packing-section\"><h2 class=\"packing-category\">Clothing</h2>\
                 <div class=\"packing-item\"><input type=\"checkbox\" class=\"packing-checkbox\"><span>Rain jacket</span></div>\
                 <div class=\"packing-item\"><input type=\"checkbox\" class=\"packing-checkbox\"><span><strong>Comfortable</strong> walking shoes</span></div></div>"
            ));
        }

        #[test]
        fn packing_note_renders_as_category_and_as_note() {
            let html = packing::render(PACKING);
            assert_eq!(html.matches("class=\"packing-item\"").count(), 4);
            assert!(html.ends_with(
                "<div class=\"packing-note\"><h3>Note</h3><p>• Check the forecast before leaving</p></div>"
            ));
            assert_eq!(html.matches("Check the forecast before leaving").count(), 2);
        }

        #[test]
        fn budget_total_is_separate_from_categories() {
            let html = budget::render(BUDGET);
            assert!(html.starts_with("<h1 class=\"budget-title\">Budget Estimate for Chicago</h1>"));
            assert!(html.contains(
                "<div class=\"budget-category\"><h3 class=\"category-title\">Accommodation</h3>\
                 <div class=\"budget-item\"><div class=\"item-desc\">Hotel</div><div class=\"item-value\">$200</div></div></div>"
            ));
            assert!(html.contains(
                "<div class=\"total-section\"><h3 class=\"category-title\">Total Estimated Budget</h3>\
                 <div class=\"budget-item\"><div class=\"item-desc\">Total</div><div class=\"item-value\">$800</div></div></div>"
            ));
            assert!(html.ends_with(
                "<div class=\"budget-note\"><h3>Note:</h3>Prices vary by season.</div>"
            ));
            assert_eq!(html.matches("budget-category").count(), 1);
        }

        #[test]
        fn budget_text_between_categories_keeps_its_place() {
            let text = "## Budget Estimate\n### A\n- **x**: 1\n#### Sub\nsub text\n### B\n- **y**: 2\n#### Note:\nN\n";
            let html = budget::render(text);
            let a = pos(&html, "<h3 class=\"category-title\">A</h3>");
            let sub = pos(&html, "<h4>Sub</h4>sub text");
            let b = pos(&html, "<h3 class=\"category-title\">B</h3>");
            let note = pos(&html, "<div class=\"budget-note\">");
            assert!(a < sub && sub < b && b < note, "{}", html);
            assert_eq!(html.matches("sub text").count(), 1);
        }

        #[test]
        fn only_the_first_total_is_structured() {
            let text = "## Budget Estimate\n### Food\n- **Meals**: $300\n### Total Estimated Budget\n- **Low**: $900\n### Total Estimated Budget (Luxury)\n- **High**: $2,000\n";
            let html = budget::render(text);
            assert_eq!(html.matches("class=\"budget-category\"").count(), 1);
            assert_eq!(html.matches("class=\"total-section\"").count(), 1);
            assert!(html.ends_with(
                "<h3>Total Estimated Budget (Luxury)</h3><div class=\"list-item\">• <strong>High</strong>: $2,000</div>"
            ));
            assert!(!html.contains("category-title\">Total Estimated Budget (Luxury)"));
        }

        #[test]
        fn budget_falls_back_to_level_four_categories() {
            let text = "### Budget Estimate for Chicago\n\n#### 1. Accommodation:\n- **Budget Accommodation:** $80 - $120 per night\n- malformed line without bold\n#### Total Estimated Budget Range:\n- **Low End:** $900 - $1,200\n";
            let html = budget::render(text);
            assert!(html.contains("<h3 class=\"category-title\">1. Accommodation:</h3>"));
            assert!(html.contains(
                "<div class=\"item-desc\">Budget Accommodation</div><div class=\"item-value\">$80 - $120 per night</div>"
            ));
            assert!(!html.contains("malformed"));
            assert!(html.contains("<div class=\"total-section\"><h3 class=\"category-title\">Total Estimated Budget Range:</h3>"));
        }

        #[test]
        fn unstructured_text_renders_generically_for_every_type() {
            let text = "just some words\nand *more* words";
            let expected = render_as(ContentType::Unknown, text);
            for kind in [
                ContentType::Itinerary,
                ContentType::PackingList,
                ContentType::Budget,
            ] {
                assert_eq!(render_as(kind, text), expected, "kind {}", kind);
            }
        }

        #[test]
        fn document_detection_picks_renderer() {
            assert!(render_document(ITINERARY).contains("day-section"));
            assert!(render_document(PACKING).contains("packing-section"));
            assert!(render_document(BUDGET).contains("budget-title"));
        }

        #[test]
        fn plan_rendering_uses_placeholders() {
            let plan = TravelPlan {
                itinerary: Some(ITINERARY.to_string()),
                packing_list: None,
                estimated_budget: Some(String::new()),
            };
            let rendered = render_plan(&plan);
            assert!(rendered.itinerary.contains("day-section"));
            assert_eq!(
                strip_markup(rendered.get(Category::PackingList)),
                Category::PackingList.placeholder()
            );
            assert_eq!(
                strip_markup(&rendered.estimated_budget),
                Category::Budget.placeholder()
            );
        }

        #[test]
        fn visible_text_survives_generic_rendering() {
            let html = render_as(ContentType::Unknown, "- **Hotel** stay\n- Pack *light* bag");
            assert_eq!(strip_markup(&html), "• Hotel stay\n• Pack light bag");
            let escaped = render_as(ContentType::Unknown, "Fish & <chips>");
            assert!(escaped.contains("Fish &amp; &lt;chips&gt;"));
            assert_eq!(strip_markup(&escaped), "Fish & <chips>");
        }
    }
}

pub mod projectors {
    pub mod calendar_projector {
        //! Itinerary → calendar events.
        //!
        //! A single linear scan over the raw lines that tracks the current day and time
        //! block. Only day headers and time labels move that state; other headings leave
        //! it alone. It shares the line classifier with the renderers but never looks at
        //! rendered markup.

        use crate::core::*;
        use crate::format::format_calendar;
        use crate::parser::{classify_line, first_heading, lines, parse_inlines};
        use anyhow::{Context, Result};
        use chrono::{NaiveDate, TimeDelta};
        use log::{debug, trace, warn};
        use serde::{Deserialize, Serialize};

        pub const DEFAULT_PRODUCT_ID: &str = "-//NoDetours Trip Planner//EN";

        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct ExportOptions {
            /// Destination named in event descriptions; inferred from the title when unset.
            pub destination: Option<String>,
            pub product_id: String,
            pub schedule: Schedule,
        }

        impl Default for ExportOptions {
            fn default() -> Self {
                Self {
                    destination: None,
                    product_id: DEFAULT_PRODUCT_ID.to_string(),
                    schedule: Schedule::default(),
                }
            }
        }

        impl ExportOptions {
            /// Parse a JSON options document; omitted fields keep their defaults.
            pub fn from_json_str(raw: &str) -> Result<Self> {
                let opts: Self = serde_json::from_str(raw).context("parsing export options")?;
                opts.schedule.validate()?;
                Ok(opts)
            }

            fn destination_for(&self, text: &str) -> Option<String> {
                match self.destination.as_deref().map(str::trim) {
                    Some(place) if !place.is_empty() => Some(place.to_string()),
                    _ => infer_destination(text),
                }
            }
        }

        /// `X` from a level-1 title such as `# X Travel Itinerary for 3 Days`.
        pub fn infer_destination(text: &str) -> Option<String> {
            let (_, title) = first_heading(text, 1)?;
            let lower = title.to_ascii_lowercase();
            [" travel itinerary", " itinerary"]
                .into_iter()
                .filter_map(|marker| lower.find(marker))
                .map(|idx| title[..idx].trim())
                .find(|place| !place.is_empty())
                .map(str::to_string)
        }

        /// Base date of day `number`: `today` plus `number - 1` days.
        pub fn day_date(today: NaiveDate, number: i64) -> Option<NaiveDate> {
            let offset = number.checked_sub(1)?;
            today.checked_add_signed(TimeDelta::try_days(offset)?)
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum DayState {
            NoDay,
            InDay { number: i64, date: NaiveDate },
        }

        /// Activities found under a time block of a numbered day, with each day's base date.
        pub fn scan_activities(text: &str, today: NaiveDate) -> Vec<(Activity, NaiveDate)> {
            let mut out = Vec::new();
            let mut day = DayState::NoDay;
            let mut block: Option<TimeBlock> = None;

            for line in lines(text) {
                match classify_line(line.text) {
                    LineTag::DayHeader { label, number, .. } => {
                        block = None;
                        day = match number.and_then(|n| day_date(today, n).map(|date| (n, date))) {
                            Some((number, date)) => {
                                debug!("day {} starts on {}", number, date);
                                DayState::InDay { number, date }
                            }
                            None => {
                                warn!(
                                    "day header {:?} has no calendar date; skipping its activities",
                                    label
                                );
                                DayState::NoDay
                            }
                        };
                    }
                    LineTag::TimeLabel { block: found, .. } => block = Some(found),
                    LineTag::ListItem { text, .. } => {
                        let (DayState::InDay { number, date }, Some(active)) = (day, block) else {
                            trace!("list item outside a dated time block: {:?}", text);
                            continue;
                        };
                        let title = plain_text(&parse_inlines(&text, Spans::Strong))
                            .trim()
                            .to_string();
                        if title.is_empty() {
                            continue;
                        }
                        out.push((
                            Activity {
                                title,
                                block: active,
                                day: number,
                            },
                            date,
                        ));
                    }
                    LineTag::Heading { .. } | LineTag::Plain { .. } | LineTag::Blank => {}
                }
            }
            out
        }

        /// One event per activity, in document order.
        pub fn project_itinerary(
            text: &str,
            today: NaiveDate,
            opts: &ExportOptions,
        ) -> Vec<CalendarEvent> {
            let destination = opts.destination_for(text);
            events_for(text, today, opts, destination.as_deref())
        }

        fn events_for(
            text: &str,
            today: NaiveDate,
            opts: &ExportOptions,
            destination: Option<&str>,
        ) -> Vec<CalendarEvent> {
            scan_activities(text, today)
                .into_iter()
                .map(|(activity, date)| {
                    let slot = opts.schedule.slot(activity.block);
                    activity.into_event(date, slot, destination)
                })
                .collect()
        }

        /// Project and serialize an itinerary into a downloadable calendar.
        pub fn export_calendar(text: &str, today: NaiveDate, opts: &ExportOptions) -> CalendarExport {
            let destination = opts.destination_for(text);
            let events = events_for(text, today, opts, destination.as_deref());
            debug!("projected {} calendar events", events.len());
            CalendarExport {
                content: format_calendar(&events, &opts.product_id),
                mime_type: CALENDAR_MIME.to_string(),
                filename: suggested_filename(destination.as_deref()),
                events,
            }
        }

        /// `<destination-slug>-itinerary.ics`, or `itinerary.ics` without a destination.
        pub fn suggested_filename(destination: Option<&str>) -> String {
            let mut slug = String::new();
            for ch in destination.unwrap_or_default().chars() {
                if ch.is_alphanumeric() {
                    slug.extend(ch.to_lowercase());
                } else if !slug.is_empty() && !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            let slug = slug.trim_end_matches('-');
            if slug.is_empty() {
                "itinerary.ics".to_string()
            } else {
                format!("{}-itinerary.ics", slug)
            }
        }

    }
}

pub mod storage {
    //! Filesystem access for the command-line front end; the engine itself is I/O-free.

    use crate::core::TravelPlan;
    use anyhow::{Context, Result};
    use std::{fs, path::Path};

    pub trait TextSource {
        fn read_text(&self, abs_path: &Path) -> Result<String>;

        /// Decode a planning-API payload (`itinerary`, `packing_list`, `estimated_budget`).
        fn read_plan(&self, abs_path: &Path) -> Result<TravelPlan> {
            let raw = self.read_text(abs_path)?;
            serde_json::from_str(&raw)
                .with_context(|| format!("decoding plan payload {:?}", abs_path))
        }
    }

    pub struct FsTextSource;

    impl TextSource for FsTextSource {
        fn read_text(&self, abs_path: &Path) -> Result<String> {
            fs::read_to_string(abs_path).with_context(|| format!("reading {:?}", abs_path))
        }
    }

}

pub use parser::{classify_line, detect_content_type, extract_sections};
pub use projectors::calendar_projector::{ExportOptions, export_calendar, project_itinerary};
pub use render::{render_as, render_document, render_plan};
