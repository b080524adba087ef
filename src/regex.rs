//! Streaming regular-expression matching over UTF-16 code units.
//!
//! Patterns are parsed with `regex-syntax`; the resulting HIR is
//! compiled to a small NFA program over code units (astral scalars
//! become surrogate-pair sequences) and executed by a Pike VM with
//! leftmost-first thread priority.
//!
//! The engine is built for feeding a document one chunk at a time:
//! [`Regex::match_slice`] takes a slice and an `is_final` flag and
//! reports *hard partial* results. When the end of the input is reached
//! while some thread could still begin or extend a match, the result is
//! [`MatchResult::Partial`] with the earliest offset such a match could
//! start at — even if a complete match was already found — and the
//! caller re-feeds the retained suffix together with more data. A
//! recorded match is only committed as [`MatchResult::Full`] once no
//! live thread remains.

use bitflags::bitflags;
use regex_syntax::hir::{Class, Hir, HirKind, Look};

use crate::error::{Error, Result};

const LF: u16 = b'\n' as u16;

/// Compiled program size cap. Counted repetitions are expanded during
/// compilation, so the cap also bounds `{m,n}` expansion.
const MAX_PROGRAM_SIZE: usize = 1 << 16;

bitflags! {
    /// Pattern compilation options.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RegexOptions: u8 {
        /// Case-insensitive matching.
        const IGNORE_CASE = 1 << 0;
        /// `^` and `$` match at line boundaries, not just input
        /// boundaries.
        const MULTILINE = 1 << 1;
    }
}

/// Result of feeding a slice to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchResult {
    /// No match, and no thread survived to the end of the slice.
    None,
    /// The end of the slice was reached while a match could still start
    /// at or continue from `start_offset`. Feed more data, retaining the
    /// slice suffix from that offset.
    Partial { start_offset: u32 },
    /// A committed match.
    Full { start_offset: u32, end_offset: u32 },
    /// The engine failed; the search should be abandoned.
    Error,
}

#[derive(Clone, Debug)]
enum Inst {
    Unit(u16),
    Ranges(Box<[(u16, u16)]>),
    Split(usize, usize),
    Jmp(usize),
    Assert(Assertion),
    Match,
}

#[derive(Clone, Copy, Debug)]
enum Assertion {
    TextStart,
    TextEnd,
    LineStart,
    LineEnd,
    WordBoundary { ascii: bool, negate: bool },
}

/// A compiled streaming pattern.
#[derive(Clone, Debug)]
pub struct Regex {
    insts: Vec<Inst>,
    pattern: String,
}

/// Reusable per-search scratch for [`Regex::match_slice`].
#[derive(Debug, Default)]
pub struct MatchData {
    current: Vec<Thread>,
    next: Vec<Thread>,
    seen: Vec<u32>,
    stamp: u32,
}

#[derive(Clone, Copy, Debug)]
struct Thread {
    pc: usize,
    start: u32,
}

impl MatchData {
    /// Create scratch sized for a compiled pattern.
    #[must_use]
    pub fn new(regex: &Regex) -> Self {
        Self {
            current: Vec::new(),
            next: Vec::new(),
            seen: vec![0; regex.insts.len()],
            stamp: 0,
        }
    }
}

impl Regex {
    /// Compile a pattern.
    pub fn new(pattern: &str, options: RegexOptions) -> Result<Regex> {
        let hir = regex_syntax::ParserBuilder::new()
            .case_insensitive(options.contains(RegexOptions::IGNORE_CASE))
            .multi_line(options.contains(RegexOptions::MULTILINE))
            .build()
            .parse(pattern)
            .map_err(|error| Error::InvalidPattern(error.to_string()))?;
        let mut compiler = Compiler { insts: Vec::new() };
        compiler.compile(&hir)?;
        compiler.emit(Inst::Match)?;
        Ok(Regex {
            insts: compiler.insts,
            pattern: pattern.to_string(),
        })
    }

    /// The source pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Search a slice of UTF-16 code units.
    ///
    /// The engine is stateless across calls; on a `Partial` result the
    /// caller retains the suffix from `start_offset` and feeds it again,
    /// prepended to the next chunk. `is_final` marks the last chunk of
    /// the subject, letting end-of-input assertions resolve.
    pub fn match_slice(
        &self,
        data: &[u16],
        match_data: &mut MatchData,
        is_final: bool,
    ) -> MatchResult {
        let insts = &self.insts;
        if match_data.seen.len() < insts.len() {
            match_data.seen.resize(insts.len(), 0);
        }
        let MatchData {
            current,
            next,
            seen,
            stamp,
        } = match_data;
        current.clear();
        next.clear();

        let mut matched: Option<(u32, u32)> = None;
        let mut pending_start: Option<u32> = None;

        *stamp = stamp.wrapping_add(1);
        // Seeding can itself complete a match (empty pattern); the
        // scanner thread is lowest priority, so nothing needs truncating.
        add_thread(
            insts,
            current,
            seen,
            *stamp,
            0,
            0,
            0,
            data,
            is_final,
            &mut matched,
            &mut pending_start,
        );

        for pos in 0..data.len() {
            if current.is_empty() && matched.is_some() {
                break;
            }
            let unit = data[pos];
            next.clear();
            *stamp = stamp.wrapping_add(1);
            for index in 0..current.len() {
                let thread = current[index];
                let consumes = match &insts[thread.pc] {
                    Inst::Unit(expected) => *expected == unit,
                    Inst::Ranges(ranges) => {
                        ranges.iter().any(|&(lo, hi)| lo <= unit && unit <= hi)
                    }
                    _ => false,
                };
                if consumes
                    && add_thread(
                        insts,
                        next,
                        seen,
                        *stamp,
                        thread.pc + 1,
                        thread.start,
                        (pos + 1) as u32,
                        data,
                        is_final,
                        &mut matched,
                        &mut pending_start,
                    )
                {
                    // A match commits; threads after this one are lower
                    // priority and die.
                    break;
                }
            }
            std::mem::swap(current, next);
            if matched.is_none() {
                add_thread(
                    insts,
                    current,
                    seen,
                    *stamp,
                    0,
                    0,
                    (pos + 1) as u32,
                    data,
                    is_final,
                    &mut matched,
                    &mut pending_start,
                );
            }
        }

        let live_start = current
            .iter()
            .map(|thread| thread.start)
            .chain(pending_start)
            .min();
        if !is_final {
            if let Some(start) = live_start {
                if let Some((match_start, match_end)) = matched {
                    if start > match_start {
                        return MatchResult::Full {
                            start_offset: match_start,
                            end_offset: match_end,
                        };
                    }
                }
                return MatchResult::Partial {
                    start_offset: start,
                };
            }
        }
        match matched {
            Some((start_offset, end_offset)) => MatchResult::Full {
                start_offset,
                end_offset,
            },
            None => MatchResult::None,
        }
    }
}

/// Add a thread's epsilon closure to a list, in priority order. Returns
/// `true` when the closure reached `Match`: the match is recorded and
/// every lower-priority alternative dies.
#[allow(clippy::too_many_arguments)]
fn add_thread(
    insts: &[Inst],
    list: &mut Vec<Thread>,
    seen: &mut [u32],
    stamp: u32,
    pc: usize,
    start: u32,
    pos: u32,
    data: &[u16],
    is_final: bool,
    matched: &mut Option<(u32, u32)>,
    pending_start: &mut Option<u32>,
) -> bool {
    if seen[pc] == stamp {
        return false;
    }
    seen[pc] = stamp;
    match &insts[pc] {
        Inst::Unit(_) | Inst::Ranges(_) => {
            list.push(Thread { pc, start });
            false
        }
        Inst::Jmp(target) => add_thread(
            insts, list, seen, stamp, *target, start, pos, data, is_final, matched,
            pending_start,
        ),
        Inst::Split(first, second) => {
            if add_thread(
                insts, list, seen, stamp, *first, start, pos, data, is_final, matched,
                pending_start,
            ) {
                return true;
            }
            add_thread(
                insts, list, seen, stamp, *second, start, pos, data, is_final, matched,
                pending_start,
            )
        }
        Inst::Assert(assertion) => match eval_assertion(*assertion, pos, data, is_final) {
            AssertOutcome::Pass => add_thread(
                insts,
                list,
                seen,
                stamp,
                pc + 1,
                start,
                pos,
                data,
                is_final,
                matched,
                pending_start,
            ),
            AssertOutcome::Fail => false,
            AssertOutcome::Pending => {
                *pending_start = Some(match *pending_start {
                    Some(existing) => existing.min(start),
                    None => start,
                });
                false
            }
        },
        Inst::Match => {
            *matched = Some((start, pos));
            true
        }
    }
}

enum AssertOutcome {
    Pass,
    Fail,
    /// Undecidable until more input arrives: the thread is viable and
    /// counts toward a partial result.
    Pending,
}

fn eval_assertion(assertion: Assertion, pos: u32, data: &[u16], is_final: bool) -> AssertOutcome {
    let pos = pos as usize;
    let at_end = pos == data.len();
    let previous = pos.checked_sub(1).map(|i| data[i]);
    let next = data.get(pos).copied();
    match assertion {
        Assertion::TextStart => {
            if pos == 0 {
                AssertOutcome::Pass
            } else {
                AssertOutcome::Fail
            }
        }
        Assertion::TextEnd => {
            if !at_end {
                AssertOutcome::Fail
            } else if is_final {
                AssertOutcome::Pass
            } else {
                AssertOutcome::Pending
            }
        }
        Assertion::LineStart => {
            if pos == 0 || previous == Some(LF) {
                AssertOutcome::Pass
            } else {
                AssertOutcome::Fail
            }
        }
        Assertion::LineEnd => {
            if at_end {
                if is_final {
                    AssertOutcome::Pass
                } else {
                    AssertOutcome::Pending
                }
            } else if next == Some(LF) {
                AssertOutcome::Pass
            } else {
                AssertOutcome::Fail
            }
        }
        Assertion::WordBoundary { ascii, negate } => {
            if at_end && !is_final {
                return AssertOutcome::Pending;
            }
            let boundary = is_word_unit(previous, ascii) != is_word_unit(next, ascii);
            if boundary != negate {
                AssertOutcome::Pass
            } else {
                AssertOutcome::Fail
            }
        }
    }
}

fn is_word_unit(unit: Option<u16>, ascii: bool) -> bool {
    let Some(unit) = unit else { return false };
    if unit == b'_' as u16 {
        return true;
    }
    if ascii {
        return unit < 128 && (unit as u8 as char).is_ascii_alphanumeric();
    }
    char::from_u32(u32::from(unit)).is_some_and(char::is_alphanumeric)
}

struct Compiler {
    insts: Vec<Inst>,
}

impl Compiler {
    fn emit(&mut self, inst: Inst) -> Result<usize> {
        if self.insts.len() >= MAX_PROGRAM_SIZE {
            return Err(Error::PatternTooLarge {
                limit: MAX_PROGRAM_SIZE,
            });
        }
        self.insts.push(inst);
        Ok(self.insts.len() - 1)
    }

    fn compile(&mut self, hir: &Hir) -> Result<()> {
        match hir.kind() {
            HirKind::Empty => Ok(()),
            HirKind::Literal(literal) => {
                let text = std::str::from_utf8(&literal.0)
                    .map_err(|_| Error::InvalidPattern("non-UTF-8 literal".to_string()))?;
                for unit in text.encode_utf16() {
                    self.emit(Inst::Unit(unit))?;
                }
                Ok(())
            }
            HirKind::Class(class) => self.compile_class(class),
            HirKind::Look(look) => {
                let assertion = match look {
                    Look::Start => Assertion::TextStart,
                    Look::End => Assertion::TextEnd,
                    Look::StartLF | Look::StartCRLF => Assertion::LineStart,
                    Look::EndLF | Look::EndCRLF => Assertion::LineEnd,
                    Look::WordAscii => Assertion::WordBoundary {
                        ascii: true,
                        negate: false,
                    },
                    Look::WordAsciiNegate => Assertion::WordBoundary {
                        ascii: true,
                        negate: true,
                    },
                    Look::WordUnicode => Assertion::WordBoundary {
                        ascii: false,
                        negate: false,
                    },
                    Look::WordUnicodeNegate => Assertion::WordBoundary {
                        ascii: false,
                        negate: true,
                    },
                    _ => {
                        return Err(Error::InvalidPattern(format!(
                            "unsupported assertion: {look:?}"
                        )))
                    }
                };
                self.emit(Inst::Assert(assertion))?;
                Ok(())
            }
            HirKind::Repetition(repetition) => {
                for _ in 0..repetition.min {
                    self.compile(&repetition.sub)?;
                }
                match repetition.max {
                    None => {
                        let split = self.emit(Inst::Split(0, 0))?;
                        self.compile(&repetition.sub)?;
                        self.emit(Inst::Jmp(split))?;
                        let after = self.insts.len();
                        self.insts[split] = if repetition.greedy {
                            Inst::Split(split + 1, after)
                        } else {
                            Inst::Split(after, split + 1)
                        };
                        Ok(())
                    }
                    Some(max) => {
                        let mut splits = Vec::new();
                        for _ in repetition.min..max {
                            splits.push(self.emit(Inst::Split(0, 0))?);
                            self.compile(&repetition.sub)?;
                        }
                        let after = self.insts.len();
                        for split in splits {
                            self.insts[split] = if repetition.greedy {
                                Inst::Split(split + 1, after)
                            } else {
                                Inst::Split(after, split + 1)
                            };
                        }
                        Ok(())
                    }
                }
            }
            HirKind::Capture(capture) => self.compile(&capture.sub),
            HirKind::Concat(parts) => {
                for part in parts {
                    self.compile(part)?;
                }
                Ok(())
            }
            HirKind::Alternation(alternatives) => self.compile_alternation(
                alternatives.len(),
                |compiler, index| compiler.compile(&alternatives[index]),
            ),
        }
    }

    /// Emit `Split`/`Jmp` scaffolding for `count` alternatives, each
    /// produced by `compile_one` and falling through to a common end.
    fn compile_alternation(
        &mut self,
        count: usize,
        mut compile_one: impl FnMut(&mut Self, usize) -> Result<()>,
    ) -> Result<()> {
        let mut jumps = Vec::new();
        for index in 0..count {
            if index + 1 < count {
                let split = self.emit(Inst::Split(0, 0))?;
                compile_one(self, index)?;
                jumps.push(self.emit(Inst::Jmp(0))?);
                let next_alternative = self.insts.len();
                self.insts[split] = Inst::Split(split + 1, next_alternative);
            } else {
                compile_one(self, index)?;
            }
        }
        let end = self.insts.len();
        for jump in jumps {
            self.insts[jump] = Inst::Jmp(end);
        }
        Ok(())
    }

    fn compile_class(&mut self, class: &Class) -> Result<()> {
        match class {
            Class::Bytes(bytes) => {
                let ranges: Vec<(u16, u16)> = bytes
                    .ranges()
                    .iter()
                    .map(|range| (u16::from(range.start()), u16::from(range.end())))
                    .collect();
                if ranges.is_empty() {
                    return Err(Error::InvalidPattern("empty character class".to_string()));
                }
                self.emit(Inst::Ranges(ranges.into_boxed_slice()))?;
                Ok(())
            }
            Class::Unicode(unicode) => {
                // Split scalar ranges at the BMP boundary: BMP scalars
                // are single units, astral scalars are surrogate pairs.
                let mut bmp: Vec<(u16, u16)> = Vec::new();
                let mut pairs: Vec<((u16, u16), (u16, u16))> = Vec::new();
                for range in unicode.ranges() {
                    let lo = u32::from(range.start());
                    let hi = u32::from(range.end());
                    if lo <= 0xFFFF {
                        bmp.push((lo as u16, hi.min(0xFFFF) as u16));
                    }
                    if hi >= 0x1_0000 {
                        push_astral_rectangles(lo.max(0x1_0000), hi, &mut pairs);
                    }
                }
                let alternative_count = usize::from(!bmp.is_empty()) + pairs.len();
                if alternative_count == 0 {
                    return Err(Error::InvalidPattern("empty character class".to_string()));
                }
                self.compile_alternation(alternative_count, |compiler, index| {
                    if !bmp.is_empty() && index == 0 {
                        compiler.emit(Inst::Ranges(bmp.clone().into_boxed_slice()))?;
                    } else {
                        let pair_index = index - usize::from(!bmp.is_empty());
                        let (lead, trail) = pairs[pair_index];
                        compiler.emit(Inst::Ranges(Box::new([lead])))?;
                        compiler.emit(Inst::Ranges(Box::new([trail])))?;
                    }
                    Ok(())
                })
            }
        }
    }
}

/// Decompose an astral scalar range into lead/trail surrogate
/// rectangles (at most three).
fn push_astral_rectangles(lo: u32, hi: u32, out: &mut Vec<((u16, u16), (u16, u16))>) {
    let lead = |scalar: u32| (0xD800 + ((scalar - 0x1_0000) >> 10)) as u16;
    let trail = |scalar: u32| (0xDC00 + ((scalar - 0x1_0000) & 0x3FF)) as u16;
    let (lead_lo, lead_hi) = (lead(lo), lead(hi));
    if lead_lo == lead_hi {
        out.push(((lead_lo, lead_lo), (trail(lo), trail(hi))));
        return;
    }
    out.push(((lead_lo, lead_lo), (trail(lo), 0xDFFF)));
    if lead_hi - lead_lo >= 2 {
        out.push(((lead_lo + 1, lead_hi - 1), (0xDC00, 0xDFFF)));
    }
    out.push(((lead_hi, lead_hi), (0xDC00, trail(hi))));
}
