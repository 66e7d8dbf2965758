//! Canned tutoring responses used whenever the live provider cannot answer.

use std::fmt;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::error::TutorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Math,
    Science,
    English,
    General,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Subject::Math => "math",
            Subject::Science => "science",
            Subject::English => "english",
            Subject::General => "general",
        })
    }
}

/// Evaluated top to bottom; the first subject with a matching keyword wins.
const SUBJECT_KEYWORDS: &[(Subject, &[&str])] = &[
    (
        Subject::Math,
        &[
            "math", "algebra", "geometry", "calculus", "equation", "solve", "calculate",
            "formula", "graph", "derivative", "integral", "statistics", "probability",
            "triangle", "circle", "polynomial",
        ],
    ),
    (
        Subject::Science,
        &[
            "science", "biology", "chemistry", "physics", "molecule", "atom", "cell",
            "experiment", "hypothesis", "chemical", "force", "energy", "dna", "evolution",
            "photosynthesis",
        ],
    ),
    (
        Subject::English,
        &[
            "english", "literature", "essay", "grammar", "writing", "reading", "book", "poem",
            "story", "character", "theme", "analysis", "paragraph", "sentence", "novel",
            "author",
        ],
    ),
];

const MATH_TEMPLATES: &[&str] = &[
    "**Great math question!** 📊\n\n**Let's break this down step by step:**\n\n1. **Identify what we know** - Look at the given information\n2. **Determine what we need to find** - What is the question asking for?\n3. **Choose the right approach** - Which mathematical concept applies here?\n4. **Work through it systematically** - Let's solve it together!\n\nCan you tell me what specific part is confusing you? I'm here to guide you through each step! 🤔",
    "**Excellent! I love helping with math problems!** ✨\n\n**Here's my teaching approach:**\n\n**Step 1: Understand the Problem**\n- Read it carefully and identify key information\n- What are we solving for?\n\n**Step 2: Plan Your Strategy**\n- What mathematical concepts can we use?\n- Have you seen similar problems before?\n\n**Step 3: Execute the Plan**\n- Work through each step methodically\n- Check your work as you go\n\nWhat specific area would you like me to focus on? I'm here to help you understand, not just get the answer! 📚",
];

const SCIENCE_TEMPLATES: &[&str] = &[
    "**Fascinating science question!** 🔬\n\n**Let's explore this together:**\n\n**Understanding the Concept:**\n- Let's start with the basic principles involved\n- How does this connect to what you already know?\n\n**Real-World Connection:**\n- Where do you see this happening in everyday life?\n- Why is this concept important?\n\n**Step-by-Step Analysis:**\n- Let's break down the process or problem\n- Each step builds on the previous one\n\nWhat part of this topic interests you most? Science is all about curiosity and discovery! 🌟",
    "**Great scientific thinking!** 🧪\n\n**Let's investigate this systematically:**\n\n**Observation:** What do we notice or what's given?\n**Hypothesis:** What do we think might be happening?\n**Analysis:** Let's examine the evidence step by step\n**Conclusion:** What can we learn from this?\n\nScience is like being a detective - we gather clues and piece them together! What specific aspect would you like to explore deeper? 🔍",
];

const ENGLISH_TEMPLATES: &[&str] = &[
    "**Wonderful question about language and literature!** 📚\n\n**Let's develop your understanding:**\n\n**Reading Comprehension:**\n- What is the main idea or theme?\n- What evidence supports this?\n\n**Critical Analysis:**\n- How does the author achieve their purpose?\n- What techniques do they use?\n\n**Your Own Thinking:**\n- What's your interpretation?\n- How does this connect to your experience?\n\nLiterature comes alive when we engage with it personally! What part would you like to explore together? ✍️",
    "**Excellent literary thinking!** 📖\n\n**Let's unpack this together:**\n\n**Context Understanding:** What's the background or setting?\n**Textual Evidence:** What specific details support our ideas?\n**Personal Connection:** How does this relate to broader themes?\n**Writing Skills:** How can we express our thoughts clearly?\n\nRemember, there's often more than one valid interpretation! What's your initial thought about this? 💭",
];

const GENERAL_TEMPLATES: &[&str] = &[
    "**Great question!** 🎯\n\n**Let's work through this systematically:**\n\n**Step 1: Break it Down**\n- What are the key components of this problem?\n- What do we already understand?\n\n**Step 2: Find Connections**\n- How does this relate to things you've learned before?\n- What strategies have worked for similar problems?\n\n**Step 3: Build Understanding**\n- Let's work through this together, step by step\n- I'll guide you, but you'll do the thinking!\n\nWhat part feels most challenging right now? I'm here to help you build confidence! 💪",
    "**Fantastic question!** ⭐\n\n**Here's how we'll tackle this:**\n\n**Understanding First:** Let's make sure we grasp the concept\n**Practice Together:** I'll guide you through examples\n**Build Confidence:** You'll try similar problems\n**Connect Ideas:** How does this fit with what you know?\n\nLearning is a journey, and every question gets us closer to understanding! What would help you most right now? 🚀",
];

pub fn classify(message: &str) -> Subject {
    let lowered = message.to_lowercase();
    SUBJECT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(subject, _)| *subject)
        .unwrap_or(Subject::General)
}

pub fn templates(subject: Subject) -> &'static [&'static str] {
    match subject {
        Subject::Math => MATH_TEMPLATES,
        Subject::Science => SCIENCE_TEMPLATES,
        Subject::English => ENGLISH_TEMPLATES,
        Subject::General => GENERAL_TEMPLATES,
    }
}

/// Uniform pick from the subject's pool.
pub fn pick(subject: Subject) -> &'static str {
    let pool = templates(subject);
    pool.choose(&mut rand::rng())
        .copied()
        .unwrap_or(GENERAL_TEMPLATES[0])
}

pub fn fallback_response(message: &str) -> (Subject, &'static str) {
    let subject = classify(message);
    (subject, pick(subject))
}

/// Reply for an image question the provider failed to answer, worded per
/// failure kind.
pub fn image_fallback(err: &TutorError) -> &'static str {
    match err {
        TutorError::EmptyCompletion => "I can see your image! However, I'm having trouble analyzing it right now. Could you describe what you'd like help with?",
        TutorError::ProviderError(_) => "I can see your image, but I'm having some technical difficulties. Could you try describing the problem in text?",
        TutorError::ProviderTimeout(_) => "I can see your image, but the response is taking too long. Could you try again or describe the problem in text?",
        TutorError::ProviderUnavailable(_) => "I can see your image, but I'm having connection issues. Could you try again later?",
        TutorError::MalformedResponse(_) => "I can see your image, but I'm having trouble processing the response. Could you try again?",
        _ => "I can see your image, but something unexpected happened. Could you try again or describe the problem in text?",
    }
}
